use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

use super::batch::batch_assets;
use super::channel::DeliveryChannel;
use super::types::{DownloadedAsset, MediaKind};

pub const NO_FILES_NOTICE: &str = "No valid files were downloaded.";
pub const SEND_FAILED_NOTICE: &str = "Failed to send the downloaded media. Please try again.";

/// Pushes accepted assets out through the delivery channel.
///
/// Videos go first, one message each; images follow in channel-sized
/// groups. Every send is trailed by the pacing delay so consecutive
/// messages stay under the platform's flood control.
pub struct DeliveryPump {
    pacing_delay: Duration,
    max_batch_size: usize,
}

impl DeliveryPump {
    pub fn new(pacing_delay: Duration, max_batch_size: usize) -> Self {
        Self {
            pacing_delay,
            max_batch_size,
        }
    }

    /// Returns the number of messages successfully sent. Send errors are
    /// reported to the user and logged; they never propagate.
    pub async fn deliver(
        &self,
        channel: &dyn DeliveryChannel,
        assets: &[DownloadedAsset],
    ) -> usize {
        if assets.is_empty() {
            if let Err(e) = channel.send_text(NO_FILES_NOTICE).await {
                error!("Failed to send empty-result notice: {}", e);
            }
            return 0;
        }

        match self.deliver_inner(channel, assets).await {
            Ok(sent) => sent,
            Err((sent, e)) => {
                error!("Failed to send media: {}", e);
                if let Err(e) = channel.send_text(SEND_FAILED_NOTICE).await {
                    error!("Failed to send failure notice: {}", e);
                }
                sent
            }
        }
    }

    async fn deliver_inner(
        &self,
        channel: &dyn DeliveryChannel,
        assets: &[DownloadedAsset],
    ) -> Result<usize, (usize, anyhow::Error)> {
        let mut sent = 0;

        let videos = assets.iter().filter(|a| a.kind == MediaKind::Video);
        let images: Vec<&DownloadedAsset> = assets
            .iter()
            .filter(|a| a.kind == MediaKind::Image)
            .collect();

        for video in videos {
            channel
                .send_video(&video.local_path)
                .await
                .map_err(|e| (sent, e))?;
            sent += 1;
            info!("Sent video {}", video.source_url);
            tokio::time::sleep(self.pacing_delay).await;
        }

        for group in batch_assets(&images, self.max_batch_size) {
            let items: Vec<(&Path, MediaKind)> = group
                .iter()
                .map(|a| (a.local_path.as_path(), a.kind))
                .collect();
            channel
                .send_media_group(&items)
                .await
                .map_err(|e| (sent, e))?;
            sent += 1;
            info!("Sent media group with {} items", items.len());
            tokio::time::sleep(self.pacing_delay).await;
        }

        Ok(sent)
    }
}
