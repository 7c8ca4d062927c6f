use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::types::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};

/// Non-greedy, so the URL is cut at the earliest recognized extension.
static MEDIA_URL: LazyLock<Regex> = LazyLock::new(|| {
    let extensions = IMAGE_EXTENSIONS
        .iter()
        .chain(VIDEO_EXTENSIONS)
        .copied()
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"^https://.*?\.(?:{})", extensions)).expect("media extension pattern")
});

/// Truncates a gallery URL at the first recognized media extension,
/// discarding any CDN signature or query noise appended after it.
///
/// Unrecognized URLs are passed through unchanged so the fetcher can still
/// attempt them; the gallery APIs occasionally hand back formats we have
/// not seen yet and dropping them outright loses real media.
pub fn normalize_url(raw: &str) -> String {
    match MEDIA_URL.find(raw) {
        Some(m) => {
            let cleaned = &raw[..m.end()];
            if cleaned.len() != raw.len() {
                debug!("Cleaned URL: {}", cleaned);
            }
            cleaned.to_string()
        }
        None => {
            warn!("No recognized media extension in URL: {}", raw);
            raw.to_string()
        }
    }
}
