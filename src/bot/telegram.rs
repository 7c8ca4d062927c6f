use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::multipart;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::gallery::GalleryClient;
use crate::media::{DeliveryChannel, MediaKind, MediaPipeline};
use crate::tracking::{parse_query, TrackingClient};

const GREETING: &str =
    "Hello! Send me a tracking code to look it up, or a product link to fetch its media.";
const NO_TRACKING_CODE: &str = "No valid tracking code found in your message.";
const GALLERY_FETCH_FAILED: &str = "Failed to fetch image details.";
const TRACKING_UNAVAILABLE: &str =
    "Could not reach the tracking service. Please try again later.";
const INVALID_TAOBAO_LINK: &str = "Invalid Taobao link format.";
const INVALID_PINDUODUO_LINK: &str = "Invalid Pinduoduo link format.";

/// Pause between consecutive tracking replies to the same chat.
const TRACKING_REPLY_DELAY: Duration = Duration::from_secs(1);

/// Pause before re-polling after a getUpdates failure.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Thin client for the Telegram Bot HTTP API.
pub struct TelegramApi {
    client: reqwest::Client,
    base: String,
}

impl TelegramApi {
    pub fn new(client: reqwest::Client, token: &str) -> Self {
        Self {
            client,
            base: format!("https://api.telegram.org/bot{}", token),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }

    /// Unwraps Telegram's `{ok, result, description}` envelope.
    async fn unwrap_envelope(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            anyhow::bail!(
                "Telegram API error (HTTP {}): {}",
                status,
                body.get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
            );
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let payload = json!({
            "offset": offset,
            "timeout": 30,
            "allowed_updates": ["message"],
        });
        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .json(&payload)
            .send()
            .await
            .context("getUpdates request failed")?;
        let result = Self::unwrap_envelope(response).await?;
        serde_json::from_value(result).context("Failed to decode updates")
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let payload = json!({ "chat_id": chat_id, "text": text });
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .context("sendMessage request failed")?;
        Self::unwrap_envelope(response).await?;
        Ok(())
    }

    pub async fn send_video(&self, chat_id: i64, path: &Path) -> Result<()> {
        let form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("video", file_part(path).await?);
        let response = self
            .client
            .post(self.method_url("sendVideo"))
            .multipart(form)
            .send()
            .await
            .context("sendVideo request failed")?;
        Self::unwrap_envelope(response).await?;
        Ok(())
    }

    pub async fn send_media_group(
        &self,
        chat_id: i64,
        items: &[(&Path, MediaKind)],
    ) -> Result<()> {
        let mut form = multipart::Form::new().text("chat_id", chat_id.to_string());
        let mut media = Vec::with_capacity(items.len());

        for (index, (path, kind)) in items.iter().enumerate() {
            let name = format!("file{}", index);
            let media_type = match kind {
                MediaKind::Image => "photo",
                MediaKind::Video => "video",
            };
            media.push(json!({
                "type": media_type,
                "media": format!("attach://{}", name),
            }));
            form = form.part(name, file_part(path).await?);
        }

        form = form.text("media", serde_json::to_string(&media)?);
        let response = self
            .client
            .post(self.method_url("sendMediaGroup"))
            .multipart(form)
            .send()
            .await
            .context("sendMediaGroup request failed")?;
        Self::unwrap_envelope(response).await?;
        Ok(())
    }
}

async fn file_part(path: &Path) -> Result<multipart::Part> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("media")
        .to_string();
    Ok(multipart::Part::bytes(data).file_name(file_name))
}

/// Delivery channel bound to one chat; resolved once per pipeline run.
pub struct TelegramChannel {
    api: Arc<TelegramApi>,
    chat_id: i64,
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.api.send_message(self.chat_id, text).await
    }

    async fn send_video(&self, path: &Path) -> Result<()> {
        self.api.send_video(self.chat_id, path).await
    }

    async fn send_media_group(&self, items: &[(&Path, MediaKind)]) -> Result<()> {
        self.api.send_media_group(self.chat_id, items).await
    }
}

/// What to do with one incoming message, decided from its text alone.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    Start,
    TaobaoGallery(String),
    PinduoduoGallery(String),
    InvalidTaobao,
    InvalidPinduoduo,
    Tracking,
}

pub fn route_message(text: &str) -> Route {
    let text = text.trim();
    if text == "/start" || text.starts_with("/start ") {
        Route::Start
    } else if text.starts_with("https://item.taobao.com/") {
        match extract_taobao_id(text) {
            Some(id) => Route::TaobaoGallery(id),
            None => Route::InvalidTaobao,
        }
    } else if text.starts_with("https://mobile.yangkeduo.com/") {
        if has_goods_page(text) {
            Route::PinduoduoGallery(text.to_string())
        } else {
            Route::InvalidPinduoduo
        }
    } else {
        Route::Tracking
    }
}

/// Product id is the value of the last query parameter on item pages.
fn extract_taobao_id(url: &str) -> Option<String> {
    let id = url.rsplit_once('=').map(|(_, id)| id)?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

static GOODS_PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"goods\d*\.html").expect("goods page pattern"));

/// Matches a `goods<digits>.html` page segment anywhere in the URL.
fn has_goods_page(url: &str) -> bool {
    GOODS_PAGE.is_match(url)
}

#[derive(Clone)]
pub struct TelegramBot {
    api: Arc<TelegramApi>,
    pipeline: Arc<MediaPipeline>,
    gallery: Arc<GalleryClient>,
    tracking: Arc<TrackingClient>,
}

impl TelegramBot {
    pub fn new(token: String, config: Config) -> Result<Self> {
        // Longer than the 30 s getUpdates long poll.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client")?;

        let api = Arc::new(TelegramApi::new(client.clone(), &token));
        let pipeline = Arc::new(
            MediaPipeline::new(config.pipeline.clone())
                .context("Failed to initialize media pipeline")?,
        );
        let gallery = Arc::new(GalleryClient::new(
            client.clone(),
            config.api.clone(),
            config.gallery_fields.clone(),
        ));
        let tracking = Arc::new(TrackingClient::new(client, config.api.tracking_url.clone()));

        Ok(Self {
            api,
            pipeline,
            gallery,
            tracking,
        })
    }

    pub async fn run(self) -> Result<()> {
        info!("Telegram bot starting...");
        let mut offset = 0i64;

        loop {
            let updates = match self.api.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    error!("Error receiving updates: {}", e);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let Some(text) = message.text else {
                    continue;
                };

                // One task per message; pipelines for different chats run
                // independently and share no state.
                let bot = self.clone();
                let chat_id = message.chat.id;
                tokio::spawn(async move {
                    if let Err(e) = bot.handle_message(chat_id, &text).await {
                        error!("Failed to handle message in chat {}: {}", chat_id, e);
                    }
                });
            }
        }
    }

    async fn handle_message(&self, chat_id: i64, text: &str) -> Result<()> {
        match route_message(text) {
            Route::Start => self.api.send_message(chat_id, GREETING).await,
            Route::TaobaoGallery(product_id) => {
                info!("Extracted Taobao id from URL: {}", product_id);
                match self.gallery.taobao_gallery(&product_id).await {
                    Ok(urls) => self.deliver_gallery(chat_id, urls).await,
                    Err(e) => {
                        error!("Taobao gallery lookup failed: {}", e);
                        self.api.send_message(chat_id, GALLERY_FETCH_FAILED).await
                    }
                }
            }
            Route::PinduoduoGallery(link) => match self.gallery.pinduoduo_gallery(&link).await {
                Ok(urls) => self.deliver_gallery(chat_id, urls).await,
                Err(e) => {
                    error!("Pinduoduo gallery lookup failed: {}", e);
                    self.api.send_message(chat_id, GALLERY_FETCH_FAILED).await
                }
            },
            Route::InvalidTaobao => {
                warn!("Invalid Taobao link: {}", text);
                self.api.send_message(chat_id, INVALID_TAOBAO_LINK).await
            }
            Route::InvalidPinduoduo => {
                warn!("Invalid Pinduoduo link: {}", text);
                self.api.send_message(chat_id, INVALID_PINDUODUO_LINK).await
            }
            Route::Tracking => self.handle_tracking(chat_id, text).await,
        }
    }

    async fn deliver_gallery(&self, chat_id: i64, urls: Vec<String>) -> Result<()> {
        let channel = TelegramChannel {
            api: self.api.clone(),
            chat_id,
        };
        let report = self.pipeline.run(&urls, &channel).await;
        info!(
            "Pipeline finished for chat {}: {} requested, {} fetched, {} accepted, {} messages",
            chat_id, report.requested, report.fetched, report.accepted, report.messages_sent
        );
        Ok(())
    }

    async fn handle_tracking(&self, chat_id: i64, text: &str) -> Result<()> {
        let Some(query) = parse_query(text) else {
            warn!("No valid tracking numbers found");
            return self.api.send_message(chat_id, NO_TRACKING_CODE).await;
        };

        match self.tracking.lookup(&query).await {
            Ok(replies) => {
                for reply in replies {
                    self.api.send_message(chat_id, &reply).await?;
                    tokio::time::sleep(TRACKING_REPLY_DELAY).await;
                }
                Ok(())
            }
            Err(e) => {
                error!("Tracking lookup failed: {}", e);
                self.api.send_message(chat_id, TRACKING_UNAVAILABLE).await
            }
        }
    }
}

pub async fn run_with_config(config: Config) -> Result<()> {
    let token = config
        .get_telegram_token()
        .context("TELEGRAM_TOKEN environment variable or telegram_token config key is required")?;

    let bot = TelegramBot::new(token, config)?;
    bot.run().await
}
