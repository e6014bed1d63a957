use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use url::Url;

use super::types::{FetchError, FetchedImage};

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError>;
}

#[derive(Clone, Default)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn decode_data_url(url: &str) -> Result<FetchedImage, FetchError> {
    let rest = url.strip_prefix("data:").ok_or(FetchError::MalformedDataUrl)?;
    let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
    let (meta, payload) = rest.split_once(',').ok_or(FetchError::MalformedDataUrl)?;
    let media_type = meta
        .strip_suffix(";base64")
        .ok_or(FetchError::MalformedDataUrl)?;
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| FetchError::MalformedDataUrl)?;

    Ok(FetchedImage {
        bytes,
        content_type: (!media_type.is_empty()).then(|| media_type.to_string()),
    })
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        if url.starts_with("data:") {
            return decode_data_url(url);
        }

        let parsed = Url::parse(url).map_err(|_| FetchError::UnsupportedUrl(url.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {
                let response = self.client.get(parsed).send().await?.error_for_status()?;
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let bytes = response.bytes().await?;
                Ok(FetchedImage {
                    bytes: bytes.to_vec(),
                    content_type,
                })
            }
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| FetchError::UnsupportedUrl(url.to_string()))?;
                let bytes = tokio::fs::read(&path).await?;
                Ok(FetchedImage {
                    bytes,
                    content_type: None,
                })
            }
            _ => Err(FetchError::UnsupportedUrl(url.to_string())),
        }
    }
}
