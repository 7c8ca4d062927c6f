use std::path::PathBuf;

/// File extensions the pipeline recognizes, videos last.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify by file extension; anything that is not a known video
    /// extension is treated as an image and left to the dimension filter.
    pub fn from_extension(ext: &str) -> Self {
        if VIDEO_EXTENSIONS.iter().any(|v| ext.eq_ignore_ascii_case(v)) {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

/// A media file fetched to the pipeline's working directory.
///
/// The file lives under the run's temp dir and is removed either when the
/// filter rejects it or when the run directory is torn down.
#[derive(Debug)]
pub struct DownloadedAsset {
    pub local_path: PathBuf,
    pub kind: MediaKind,
    pub source_url: String,
}
