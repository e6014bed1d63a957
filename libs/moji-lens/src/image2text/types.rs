use serde::{Deserialize, Serialize};

use crate::messaging::ChannelError;

pub const DEFAULT_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
pub const DEFAULT_PROMPT: &str =
    "Extract all Japanese text visible in this image. Return only the text, nothing else.";
pub const DEFAULT_MAX_TOKENS: u32 = 256;
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VisionConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub api_version: Option<String>,
}

impl VisionConfig {
    pub fn new() -> Self {
        Self {
            url: None,
            model: None,
            prompt: None,
            max_tokens: None,
            api_version: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn unpack(&self) -> (&str, &str, &str, u32, &str) {
        (
            self.url.as_deref().unwrap_or(DEFAULT_URL),
            self.model.as_deref().unwrap_or(DEFAULT_MODEL),
            self.prompt.as_deref().unwrap_or(DEFAULT_PROMPT),
            self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            self.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION),
        )
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("No API key configured. Open Moji Lens settings to add your Anthropic API key.")]
    MissingApiKey,

    #[error("Invalid image data URL")]
    InvalidDataUrl,

    #[error("Anthropic API error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("{0}")]
    Transport(String),

    #[error("Failed to parse Anthropic response: {0}")]
    Parse(String),

    #[error("Could not read settings: {0}")]
    Store(String),

    #[error("{0}")]
    Remote(String),

    #[error("Unexpected reply to CLAUDE_OCR: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
