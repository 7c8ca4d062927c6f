use tracing::{info, warn};

use super::types::{DownloadedAsset, MediaKind};

/// Drops placeholder/thumbnail images below the configured dimension floor.
///
/// Videos pass through uninspected. A rejected file is deleted on the spot;
/// rejection is routine filtering, never surfaced to the user.
pub fn accept_asset(asset: DownloadedAsset, min_dimension: u32) -> Option<DownloadedAsset> {
    if asset.kind == MediaKind::Video {
        return Some(asset);
    }

    match image::image_dimensions(&asset.local_path) {
        Ok((width, height)) if width >= min_dimension && height >= min_dimension => Some(asset),
        Ok((width, height)) => {
            info!(
                "Image {} is too small ({}x{}), skipping",
                asset.local_path.display(),
                width,
                height
            );
            remove_rejected(&asset);
            None
        }
        Err(e) => {
            warn!(
                "Error reading image dimensions for {}: {}",
                asset.local_path.display(),
                e
            );
            remove_rejected(&asset);
            None
        }
    }
}

fn remove_rejected(asset: &DownloadedAsset) {
    if let Err(e) = std::fs::remove_file(&asset.local_path) {
        warn!(
            "Failed to remove rejected file {}: {}",
            asset.local_path.display(),
            e
        );
    }
}
