use std::io::Write;
use std::path::Path;
use std::time::Duration;

use reqwest::{header::USER_AGENT, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{DownloadedAsset, MediaKind};
use crate::config::PipelineConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("still rate limited after {0} attempts")]
    RateLimitExhausted(u32),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to do with one HTTP response, given the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Success, consume the body.
    Done,
    /// Platform asked us to slow down; wait and try again.
    RetryAfter(Duration),
    /// Not worth another attempt.
    Abort,
}

/// Per-status retry table, kept free of I/O so it can be tested directly.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    rate_limit_wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, rate_limit_wait: Duration) -> Self {
        Self {
            max_attempts,
            rate_limit_wait,
        }
    }

    /// `attempt` is 1-based.
    pub fn decide(&self, status: StatusCode, attempt: u32) -> RetryAction {
        if status.is_success() {
            RetryAction::Done
        } else if status.as_u16() == 420 && attempt < self.max_attempts {
            RetryAction::RetryAfter(self.rate_limit_wait)
        } else {
            RetryAction::Abort
        }
    }
}

/// Downloads one media URL into the pipeline's working directory.
pub struct Fetcher {
    client: reqwest::Client,
    user_agent: String,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, config: &PipelineConfig) -> Self {
        Self {
            client,
            user_agent: config.user_agent.clone(),
            policy: RetryPolicy::new(
                config.retry_attempts,
                Duration::from_secs(config.rate_limit_wait_secs),
            ),
        }
    }

    /// Fetch `url` into a uniquely named temp file under `dir`.
    ///
    /// Failed attempts leave nothing on disk; a successful fetch leaves
    /// exactly one file, owned by the run directory.
    pub async fn fetch(&self, url: &str, dir: &Path) -> Result<DownloadedAsset, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self
                .client
                .get(url)
                .header(USER_AGENT, &self.user_agent)
                .send()
                .await?;
            let status = response.status();

            match self.policy.decide(status, attempt) {
                RetryAction::Done => return self.store(response, dir).await,
                RetryAction::RetryAfter(wait) => {
                    warn!("Rate limited (attempt {}), retrying: {}", attempt, url);
                    tokio::time::sleep(wait).await;
                }
                RetryAction::Abort => {
                    return Err(if status.as_u16() == 420 {
                        FetchError::RateLimitExhausted(attempt)
                    } else {
                        FetchError::Status(status)
                    });
                }
            }
        }
    }

    async fn store(
        &self,
        mut response: reqwest::Response,
        dir: &Path,
    ) -> Result<DownloadedAsset, FetchError> {
        let source_url = response.url().to_string();
        let extension = extension_from_url(response.url()).unwrap_or_default();

        let mut builder = tempfile::Builder::new();
        builder.prefix("media-");
        let suffix = format!(".{}", extension);
        if !extension.is_empty() {
            builder.suffix(&suffix);
        }
        let mut tmp_file = builder.tempfile_in(dir)?;

        while let Some(chunk) = response.chunk().await? {
            tmp_file.write_all(&chunk)?;
        }
        tmp_file.flush()?;

        // Detach from the guard; the run directory owns cleanup from here.
        let (_, local_path) = tmp_file.keep().map_err(|e| e.error)?;
        debug!("Downloaded {} to {}", source_url, local_path.display());

        Ok(DownloadedAsset {
            local_path,
            kind: MediaKind::from_extension(&extension),
            source_url,
        })
    }
}

/// File extension taken from the URL path, query already excluded.
fn extension_from_url(url: &url::Url) -> Option<String> {
    Path::new(url.path())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1))
    }

    #[test]
    fn test_extension_from_url() {
        let url = url::Url::parse("https://cdn.example.com/a/b/photo.jpeg?sign=x.mp4").unwrap();
        assert_eq!(extension_from_url(&url).as_deref(), Some("jpeg"));

        let url = url::Url::parse("https://cdn.example.com/no-extension").unwrap();
        assert_eq!(extension_from_url(&url), None);
    }

    #[test]
    fn test_policy_success() {
        assert_eq!(policy().decide(StatusCode::OK, 1), RetryAction::Done);
        assert_eq!(policy().decide(StatusCode::OK, 3), RetryAction::Done);
    }

    #[test]
    fn test_policy_rate_limited_retries_within_budget() {
        let rate_limited = StatusCode::from_u16(420).unwrap();
        assert_eq!(
            policy().decide(rate_limited, 1),
            RetryAction::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            policy().decide(rate_limited, 2),
            RetryAction::RetryAfter(Duration::from_secs(1))
        );
        // Third attempt is the last one allowed.
        assert_eq!(policy().decide(rate_limited, 3), RetryAction::Abort);
    }

    #[test]
    fn test_policy_other_statuses_abort_immediately() {
        for code in [404u16, 403, 500, 302] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(policy().decide(status, 1), RetryAction::Abort);
        }
    }

    /// Minimal scripted HTTP server: answers each connection with the next
    /// status in the list, counting requests.
    async fn spawn_stub_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_srv = hits.clone();

        tokio::spawn(async move {
            for status in statuses {
                let (mut stream, _) = listener.accept().await.unwrap();
                hits_srv.fetch_add(1, Ordering::SeqCst);

                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;

                let body = b"fakedata";
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.write_all(body).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{}/asset.jpg", addr), hits)
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            // No real sleeping between rate-limit retries in tests.
            rate_limit_wait_secs: 0,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_succeeds_after_rate_limits() {
        let (url, hits) = spawn_stub_server(vec![420, 420, 200]).await;
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(reqwest::Client::new(), &test_config());

        let asset = fetcher.fetch(&url, dir.path()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(asset.kind, MediaKind::Image);
        assert!(asset.local_path.exists());
        assert_eq!(std::fs::read(&asset.local_path).unwrap(), b"fakedata");

        // Exactly one file in the run directory.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_404_single_attempt() {
        let (url, hits) = spawn_stub_server(vec![404]).await;
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(reqwest::Client::new(), &test_config());

        let err = fetcher.fetch(&url, dir.path()).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(err, FetchError::Status(s) if s.as_u16() == 404));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_rate_limit_budget_exhausted() {
        let (url, hits) = spawn_stub_server(vec![420, 420, 420]).await;
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(reqwest::Client::new(), &test_config());

        let err = fetcher.fetch(&url, dir.path()).await.unwrap_err();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(matches!(err, FetchError::RateLimitExhausted(3)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_extension_from_path_not_query() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await;
            let _ = stream.shutdown().await;
        });

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(reqwest::Client::new(), &test_config());
        let url = format!("http://{}/clip.mp4?sign=v.jpg", addr);

        let asset = fetcher.fetch(&url, dir.path()).await.unwrap();
        assert_eq!(asset.kind, MediaKind::Video);
        let name = asset.local_path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".mp4"), "unexpected file name: {}", name);
    }
}
