use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use super::types::MediaKind;

/// Outbound messaging capability the pipeline delivers through.
///
/// One implementation exists per chat platform; the pipeline resolves the
/// channel once at entry and never inspects the platform again.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<()>;

    async fn send_video(&self, path: &Path) -> Result<()>;

    /// Send one media-group message. `items` is ordered and its length is
    /// bounded by the channel's attachment ceiling.
    async fn send_media_group(&self, items: &[(&Path, MediaKind)]) -> Result<()>;
}
