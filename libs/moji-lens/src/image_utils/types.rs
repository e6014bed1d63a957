use serde::{Deserialize, Serialize};

pub const MAX_IMAGE_DIM: u32 = 1024;
pub const JPEG_QUALITY: u8 = 85;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizeConfig {
    pub max_dim: u32,
    pub jpeg_quality: u8,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_dim: MAX_IMAGE_DIM,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to download image: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to read image file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported image URL: {0}")]
    UnsupportedUrl(String),

    #[error("Malformed data URL")]
    MalformedDataUrl,

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image processing task failed: {0}")]
    Task(String),
}
