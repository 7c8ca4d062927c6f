mod batch;
mod channel;
mod fetch;
mod filter;
mod normalize;
mod pump;
mod types;

pub use channel::DeliveryChannel;
pub use pump::{NO_FILES_NOTICE, SEND_FAILED_NOTICE};
pub use types::MediaKind;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use fetch::Fetcher;
use filter::accept_asset;
use normalize::normalize_url;
use pump::DeliveryPump;

/// What happened to one request, for the caller's log line.
#[derive(Debug)]
pub struct PipelineReport {
    pub requested: usize,
    pub fetched: usize,
    pub accepted: usize,
    pub messages_sent: usize,
}

/// Drives one media request: fetch every URL into a scoped working
/// directory, filter, batch, deliver, then drop the directory.
///
/// Individual URL failures are tolerated; the working directory is removed
/// on every exit path, including deadline expiry.
pub struct MediaPipeline {
    client: reqwest::Client,
    config: PipelineConfig,
}

impl MediaPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }

    pub async fn run(&self, urls: &[String], channel: &dyn DeliveryChannel) -> PipelineReport {
        let temp_dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                error!("Failed to create working directory: {}", e);
                if let Err(e) = channel.send_text(SEND_FAILED_NOTICE).await {
                    error!("Failed to send failure notice: {}", e);
                }
                return PipelineReport {
                    requested: urls.len(),
                    fetched: 0,
                    accepted: 0,
                    messages_sent: 0,
                };
            }
        };
        info!("Created temporary directory: {}", temp_dir.path().display());

        let deadline = Duration::from_secs(self.config.pipeline_deadline_secs);
        let result = tokio::time::timeout(
            deadline,
            self.run_in(urls, channel, temp_dir.path()),
        )
        .await;

        let dir_path = temp_dir.path().display().to_string();
        if let Err(e) = temp_dir.close() {
            warn!("Failed to delete temporary directory {}: {}", dir_path, e);
        } else {
            info!("Deleted temporary directory: {}", dir_path);
        }

        match result {
            Ok(report) => report,
            Err(_) => {
                error!("Pipeline deadline of {:?} exceeded", deadline);
                if let Err(e) = channel.send_text(SEND_FAILED_NOTICE).await {
                    error!("Failed to send failure notice: {}", e);
                }
                PipelineReport {
                    requested: urls.len(),
                    fetched: 0,
                    accepted: 0,
                    messages_sent: 0,
                }
            }
        }
    }

    async fn run_in(
        &self,
        urls: &[String],
        channel: &dyn DeliveryChannel,
        dir: &Path,
    ) -> PipelineReport {
        // Normalize first, then dedup on the cleaned form, keeping
        // first-occurrence order.
        let mut seen = HashSet::new();
        let normalized: Vec<String> = urls
            .iter()
            .map(|raw| normalize_url(raw))
            .filter(|url| seen.insert(url.clone()))
            .collect();

        let fetcher = Fetcher::new(self.client.clone(), &self.config);
        let mut fetched = 0;
        let mut accepted = Vec::new();

        for url in &normalized {
            info!("Downloading media: {}", url);
            match fetcher.fetch(url, dir).await {
                Ok(asset) => {
                    fetched += 1;
                    if let Some(asset) = accept_asset(asset, self.config.min_image_dimension) {
                        accepted.push(asset);
                    }
                }
                Err(e) => {
                    warn!("Failed to download media {}: {}", url, e);
                }
            }
        }

        let pump = DeliveryPump::new(
            Duration::from_secs(self.config.pacing_delay_secs),
            self.config.max_batch_size,
        );
        let messages_sent = pump.deliver(channel, &accepted).await;

        PipelineReport {
            requested: urls.len(),
            fetched,
            accepted: accepted.len(),
            messages_sent,
        }
    }
}
