use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Telegram bot token; falls back to the TELEGRAM_TOKEN env var.
    pub telegram_token: Option<String>,
    #[serde(default = "default_logging_format")]
    pub logging_format: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub gallery_fields: GalleryFields,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApiConfig {
    /// Tracking lookup endpoint (returns a JSON array of shipment records).
    pub tracking_url: Option<String>,
    /// Taobao gallery-scraper endpoint.
    pub taobao_url: Option<String>,
    /// Pinduoduo gallery-scraper endpoint.
    pub pinduoduo_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Download attempts per URL, rate-limit retries included.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Wait before retrying after an HTTP 420.
    #[serde(default = "default_rate_limit_wait_secs")]
    pub rate_limit_wait_secs: u64,
    /// Pause between consecutive sends to stay under flood control.
    #[serde(default = "default_pacing_delay_secs")]
    pub pacing_delay_secs: u64,
    /// Images with either side below this are dropped as thumbnails.
    #[serde(default = "default_min_image_dimension")]
    pub min_image_dimension: u32,
    /// Attachment ceiling per media-group message.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Overall wall-clock budget for one pipeline run.
    #[serde(default = "default_pipeline_deadline_secs")]
    pub pipeline_deadline_secs: u64,
}

/// Vendor gallery payload fields to flatten into the URL list.
///
/// The scraper API's field inventory drifts between vendors, so it is
/// configuration data rather than code.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GalleryFields {
    #[serde(default = "default_taobao_fields")]
    pub taobao: Vec<String>,
    #[serde(default = "default_pinduoduo_fields")]
    pub pinduoduo: Vec<String>,
}

fn default_logging_format() -> String {
    "json".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
        .to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_rate_limit_wait_secs() -> u64 {
    1
}

fn default_pacing_delay_secs() -> u64 {
    3
}

fn default_min_image_dimension() -> u32 {
    200
}

fn default_max_batch_size() -> usize {
    9
}

fn default_pipeline_deadline_secs() -> u64 {
    300
}

fn default_taobao_fields() -> Vec<String> {
    ["imageLinks", "skuImages", "videoLinks", "descIMG", "descVideo"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_pinduoduo_fields() -> Vec<String> {
    [
        "topGallery",
        "viewImage",
        "detailGalleryUrl",
        "videoGallery",
        "liveVideo",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            retry_attempts: default_retry_attempts(),
            rate_limit_wait_secs: default_rate_limit_wait_secs(),
            pacing_delay_secs: default_pacing_delay_secs(),
            min_image_dimension: default_min_image_dimension(),
            max_batch_size: default_max_batch_size(),
            pipeline_deadline_secs: default_pipeline_deadline_secs(),
        }
    }
}

impl Default for GalleryFields {
    fn default() -> Self {
        Self {
            taobao: default_taobao_fields(),
            pinduoduo: default_pinduoduo_fields(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_token: None,
            logging_format: default_logging_format(),
            api: ApiConfig::default(),
            pipeline: PipelineConfig::default(),
            gallery_fields: GalleryFields::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging_format
    }

    pub fn get_telegram_token(&self) -> Option<String> {
        self.telegram_token
            .clone()
            .or_else(|| std::env::var("TELEGRAM_TOKEN").ok())
    }
}
