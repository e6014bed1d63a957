use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{RelayError, VisionConfig};
use crate::store::LocalStore;

static DATA_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:(image/[^;]+);base64,(.+)$").expect("valid data url regex"));

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: Vec<Content<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Content<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Split a data URL into `(media_type, base64_payload)`.
pub fn parse_data_url(data_url: &str) -> Option<(&str, &str)> {
    let caps = DATA_URL_RE.captures(data_url)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

fn parse_response_text(body: &str) -> Result<String, RelayError> {
    let parsed: MessagesResponse =
        serde_json::from_str(body).map_err(|e| RelayError::Parse(e.to_string()))?;
    parsed
        .content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .ok_or_else(|| RelayError::Parse("response has no text content".to_string()))
}

#[derive(Clone, Debug, Default)]
pub struct VisionClient {
    client: reqwest::Client,
    config: VisionConfig,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn with_client(client: reqwest::Client, config: VisionConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &VisionConfig {
        &self.config
    }

    pub async fn extract_text(&self, api_key: &str, data_url: &str) -> Result<String, RelayError> {
        let (media_type, data) = parse_data_url(data_url).ok_or(RelayError::InvalidDataUrl)?;
        let (url, model, prompt, max_tokens, api_version) = self.config.unpack();

        let body = MessagesRequest {
            model,
            max_tokens,
            messages: vec![RequestMessage {
                role: "user",
                content: vec![
                    Content::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type,
                            data,
                        },
                    },
                    Content::Text { text: prompt },
                ],
            }],
        };

        log::debug!("Calling vision model {} with {} image ({} base64 bytes)", model, media_type, data.len());

        let response = self
            .client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_response_text(&text)
    }
}

/// Serve one `CLAUDE_OCR` request: read the API key, validate the image and
/// call the vision API.
pub async fn handle_claude_ocr(
    store: &LocalStore,
    client: &VisionClient,
    data_url: &str,
) -> Result<String, RelayError> {
    let api_key = store
        .api_key()
        .map_err(|e| RelayError::Store(e.to_string()))?
        .ok_or(RelayError::MissingApiKey)?;

    if parse_data_url(data_url).is_none() {
        return Err(RelayError::InvalidDataUrl);
    }

    client.extract_text(&api_key, data_url).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_data_url() {
        assert_eq!(
            parse_data_url("data:image/png;base64,iVBORw0KGgo="),
            Some(("image/png", "iVBORw0KGgo="))
        );
        assert_eq!(parse_data_url("data:text/plain;base64,aGk="), None);
        assert_eq!(parse_data_url("data:image/png,rawbytes"), None);
        assert_eq!(parse_data_url("https://x/a.png"), None);
    }

    #[test]
    fn test_request_body_shape() {
        let body = MessagesRequest {
            model: "m",
            max_tokens: 256,
            messages: vec![RequestMessage {
                role: "user",
                content: vec![
                    Content::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: "image/jpeg",
                            data: "AAAA",
                        },
                    },
                    Content::Text { text: "read it" },
                ],
            }],
        };

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "model": "m",
                "max_tokens": 256,
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "image", "source": { "type": "base64", "media_type": "image/jpeg", "data": "AAAA" } },
                        { "type": "text", "text": "read it" }
                    ]
                }]
            })
        );
    }

    #[test]
    fn test_parse_response_text() {
        let body = r#"{"id":"msg_1","content":[{"type":"text","text":"東京都"}],"stop_reason":"end_turn"}"#;
        assert_eq!(parse_response_text(body).unwrap(), "東京都");

        assert!(matches!(parse_response_text(r#"{"content":[]}"#), Err(RelayError::Parse(_))));
        assert!(matches!(parse_response_text("not json"), Err(RelayError::Parse(_))));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let store = LocalStore::open_in_memory().unwrap();
        let client = VisionClient::default();

        let err = handle_claude_ocr(&store, &client, "data:image/png;base64,AAAA")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MissingApiKey));
        assert!(err.to_string().contains("api key") || err.to_string().contains("API key"));
    }

    #[tokio::test]
    async fn test_invalid_data_url_is_rejected_before_any_call() {
        let store = LocalStore::open_in_memory().unwrap();
        store.set_api_key("sk-test").unwrap();
        // Unroutable endpoint: reaching the network would surface a transport error instead
        let client = VisionClient::new(VisionConfig::new().with_url("http://127.0.0.1:9/v1/messages"));

        let err = handle_claude_ocr(&store, &client, "data:text/html;base64,PGI+")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidDataUrl));
    }
}
