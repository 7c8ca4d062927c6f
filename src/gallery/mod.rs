use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{ApiConfig, GalleryFields};

/// Client for the product-gallery scraper API.
///
/// The scraper exposes one endpoint per vendor; each returns a loosely
/// structured JSON object whose media arrays are named inconsistently, so
/// the field lists to mine come from configuration.
pub struct GalleryClient {
    client: reqwest::Client,
    api: ApiConfig,
    fields: GalleryFields,
}

impl GalleryClient {
    pub fn new(client: reqwest::Client, api: ApiConfig, fields: GalleryFields) -> Self {
        Self {
            client,
            api,
            fields,
        }
    }

    pub async fn taobao_gallery(&self, product_id: &str) -> Result<Vec<String>> {
        let endpoint = self
            .api
            .taobao_url
            .as_deref()
            .context("Taobao gallery endpoint is not configured")?;
        self.fetch_gallery(endpoint, json!({ "idsp": product_id }), &self.fields.taobao)
            .await
    }

    pub async fn pinduoduo_gallery(&self, product_link: &str) -> Result<Vec<String>> {
        let endpoint = self
            .api
            .pinduoduo_url
            .as_deref()
            .context("Pinduoduo gallery endpoint is not configured")?;
        self.fetch_gallery(
            endpoint,
            json!({ "linksp": product_link }),
            &self.fields.pinduoduo,
        )
        .await
    }

    async fn fetch_gallery(
        &self,
        endpoint: &str,
        payload: Value,
        fields: &[String],
    ) -> Result<Vec<String>> {
        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            .context("Failed to reach gallery API")?;

        if !response.status().is_success() {
            anyhow::bail!("Gallery API returned HTTP {}", response.status());
        }

        let data: Value = response
            .json()
            .await
            .context("Failed to parse gallery API response")?;

        let urls = flatten_fields(&data, fields);
        debug!("Found {} media URLs in gallery payload", urls.len());
        Ok(urls)
    }
}

/// Flattens the configured array fields into one ordered URL list.
///
/// Array entries are either bare URL strings or `{"url": ...}` objects;
/// anything else is skipped. Field order, then array order, is preserved.
pub fn flatten_fields(data: &Value, fields: &[String]) -> Vec<String> {
    let mut urls = Vec::new();
    for field in fields {
        let Some(items) = data.get(field.as_str()).and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            if let Some(url) = item.as_str() {
                urls.push(url.to_string());
            } else if let Some(url) = item.get("url").and_then(Value::as_str) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}
