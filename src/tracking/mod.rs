use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::warn;

static TRACKING_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w{10,20}\b").expect("tracking code pattern"));

static THUMBNAIL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_\d+x\d+\.jpg$").expect("thumbnail suffix pattern"));

/// A parsed tracking request: one or more codes, optionally a sheet index
/// (only meaningful for single-code queries).
#[derive(Debug, PartialEq, Eq)]
pub struct TrackingQuery {
    pub codes: Vec<String>,
    pub sheet_index: Option<u32>,
}

/// Pulls tracking codes out of free text: runs of 10 to 20 word
/// characters. Returns None when the message has no plausible code.
pub fn parse_query(text: &str) -> Option<TrackingQuery> {
    let codes: Vec<String> = TRACKING_CODE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();

    if codes.is_empty() {
        return None;
    }

    let tokens: Vec<&str> = text.split_whitespace().collect();

    // "CODE 2" means look the single code up on sheet 2.
    let sheet_index = if codes.len() == 1 && tokens.len() >= 2 {
        tokens
            .last()
            .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
            .and_then(|t| t.parse().ok())
    } else {
        None
    };

    Some(TrackingQuery { codes, sheet_index })
}

/// Looks shipment records up against the tracking API.
pub struct TrackingClient {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl TrackingClient {
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        Self { client, endpoint }
    }

    /// Returns one formatted reply per matching record, plus a not-found
    /// line for each code with no match.
    pub async fn lookup(&self, query: &TrackingQuery) -> Result<Vec<String>> {
        let endpoint = self
            .endpoint
            .as_deref()
            .context("Tracking endpoint is not configured")?;

        let mut request = self.client.get(endpoint);
        if let Some(sheet) = query.sheet_index {
            request = request.query(&[("sheetIndex", sheet)]);
        }

        let response = request.send().await.context("Failed to reach tracking API")?;
        if !response.status().is_success() {
            anyhow::bail!("Tracking API returned HTTP {}", response.status());
        }

        let data: Value = response
            .json()
            .await
            .context("Failed to parse tracking API response")?;
        let records = data
            .as_array()
            .context("Tracking API did not return an array")?;

        let mut replies = Vec::new();
        for code in &query.codes {
            let matches: Vec<&Value> = records
                .iter()
                .filter(|r| record_code(r).contains(code.as_str()))
                .collect();

            if matches.is_empty() {
                warn!("No tracking info found for {}", code);
                replies.push(format!("Tracking code not found: {}", code));
            } else {
                replies.extend(matches.into_iter().map(format_record));
            }
        }
        Ok(replies)
    }
}

fn record_code(record: &Value) -> String {
    match record.get("tracking") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Human-readable summary of one shipment record.
pub fn format_record(record: &Value) -> String {
    let tracking = record
        .get("tracking")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(|| record_code(record));
    let image = record
        .get("imgurl")
        .and_then(Value::as_str)
        .map(strip_thumbnail_suffix)
        .unwrap_or("no image");
    let received = record
        .get("rec")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let quantity = match record.get("sl") {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "unknown".to_string(),
    };
    let variant = record
        .get("var")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    let status = if received { "Received" } else { "Not yet received" };
    format!(
        "Tracking code: {}\nStatus: {}\nQuantity: {}\nVariant: {}\nImage: {}",
        tracking, status, quantity, variant, image
    )
}

/// Strips a trailing `_WxH.jpg` thumbnail suffix the CDN appends to
/// product photos, restoring the full-size URL.
pub fn strip_thumbnail_suffix(url: &str) -> &str {
    match THUMBNAIL_SUFFIX.find(url) {
        Some(m) => &url[..m.start()],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_lookup_passes_sheet_index_and_matches_code() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let request_line = Arc::new(Mutex::new(String::new()));
        let seen = request_line.clone();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).to_string();
            *seen.lock().unwrap() = head.lines().next().unwrap_or("").to_string();

            let body = json!([
                { "tracking": "SPXVN04512345678", "rec": false, "sl": 1, "var": "Red" },
                { "tracking": "YT751234567890123", "rec": true },
            ])
            .to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });

        let client = TrackingClient::new(
            reqwest::Client::new(),
            Some(format!("http://{}/records", addr)),
        );
        let query = TrackingQuery {
            codes: vec!["SPXVN04512345678".to_string()],
            sheet_index: Some(2),
        };
        let replies = client.lookup(&query).await.unwrap();

        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("Tracking code: SPXVN04512345678"));
        assert!(replies[0].contains("Status: Not yet received"));
        assert!(
            request_line.lock().unwrap().contains("sheetIndex=2"),
            "request was: {}",
            request_line.lock().unwrap()
        );
    }

    #[test]
    fn test_parse_single_code() {
        let q = parse_query("SPXVN04512345678").unwrap();
        assert_eq!(q.codes, vec!["SPXVN04512345678"]);
        assert_eq!(q.sheet_index, None);
    }

    #[test]
    fn test_parse_code_with_sheet_index() {
        let q = parse_query("SPXVN04512345678 2").unwrap();
        assert_eq!(q.codes, vec!["SPXVN04512345678"]);
        assert_eq!(q.sheet_index, Some(2));
    }

    #[test]
    fn test_parse_multiple_codes_no_sheet() {
        let q = parse_query("SPXVN04512345678 YT7512345678901").unwrap();
        assert_eq!(q.codes.len(), 2);
        assert_eq!(q.sheet_index, None);
    }

    #[test]
    fn test_parse_no_codes() {
        assert_eq!(parse_query("hello there"), None);
        assert_eq!(parse_query("short 123"), None);
    }

    #[test]
    fn test_strip_thumbnail_suffix() {
        assert_eq!(
            strip_thumbnail_suffix("https://cdn/x/photo.jpg_400x400.jpg"),
            "https://cdn/x/photo.jpg"
        );
        assert_eq!(
            strip_thumbnail_suffix("https://cdn/x/photo.jpg"),
            "https://cdn/x/photo.jpg"
        );
        assert_eq!(
            strip_thumbnail_suffix("https://cdn/x/photo_axb.jpg"),
            "https://cdn/x/photo_axb.jpg"
        );
        assert_eq!(strip_thumbnail_suffix("https://cdn/x/clip.mp4"), "https://cdn/x/clip.mp4");
    }

    #[test]
    fn test_format_record() {
        let record = json!({
            "tracking": "SPXVN04512345678",
            "imgurl": "https://cdn/p.jpg_200x200.jpg",
            "rec": true,
            "sl": 3,
            "var": "Blue / XL",
        });
        let text = format_record(&record);
        assert!(text.contains("Tracking code: SPXVN04512345678"));
        assert!(text.contains("Status: Received"));
        assert!(text.contains("Quantity: 3"));
        assert!(text.contains("Variant: Blue / XL"));
        assert!(text.contains("Image: https://cdn/p.jpg"));
    }

    #[test]
    fn test_format_record_missing_fields() {
        let text = format_record(&json!({ "tracking": 987654321012345u64 }));
        assert!(text.contains("Tracking code: 987654321012345"));
        assert!(text.contains("Status: Not yet received"));
        assert!(text.contains("Image: no image"));
    }
}
