use async_trait::async_trait;

use super::RelayError;
use crate::messaging::{ContextHandle, Message, OcrReply, Reply};

#[async_trait]
pub trait OcrRelay: Send + Sync {
    async fn recognize(&self, data_url: &str) -> Result<String, RelayError>;
}

#[derive(Debug, Clone)]
pub struct ChannelRelay {
    background: ContextHandle,
}

impl ChannelRelay {
    pub fn new(background: ContextHandle) -> Self {
        Self { background }
    }
}

#[async_trait]
impl OcrRelay for ChannelRelay {
    async fn recognize(&self, data_url: &str) -> Result<String, RelayError> {
        let reply = self
            .background
            .request(Message::ClaudeOcr {
                data_url: data_url.to_string(),
            })
            .await?;

        match reply {
            Reply::Ocr(OcrReply::Text { text }) => Ok(text),
            Reply::Ocr(OcrReply::Error { error }) => Err(RelayError::Remote(error)),
            other => Err(RelayError::UnexpectedReply(format!("{:?}", other))),
        }
    }
}

impl From<Result<String, RelayError>> for OcrReply {
    fn from(result: Result<String, RelayError>) -> Self {
        match result {
            Ok(text) => OcrReply::Text { text },
            Err(e) => OcrReply::Error { error: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::ChannelError;

    #[tokio::test]
    async fn test_maps_text_and_error_replies() {
        let (handle, mut rx) = ContextHandle::channel();
        tokio::spawn(async move {
            while let Some(mut envelope) = rx.recv().await {
                let reply = match &envelope.message {
                    Message::ClaudeOcr { data_url } if data_url.ends_with("AAAA") => {
                        OcrReply::Text { text: "東京".into() }
                    }
                    _ => OcrReply::Error { error: "Anthropic API error 401: unauthorized".into() },
                };
                envelope.respond(Reply::Ocr(reply));
            }
        });

        let relay = ChannelRelay::new(handle);
        assert_eq!(relay.recognize("data:image/png;base64,AAAA").await.unwrap(), "東京");

        let err = relay.recognize("data:image/png;base64,BBBB").await.unwrap_err();
        assert!(matches!(err, RelayError::Remote(_)));
        assert_eq!(err.to_string(), "Anthropic API error 401: unauthorized");
    }

    #[tokio::test]
    async fn test_closed_background_fails_fast() {
        let (handle, rx) = ContextHandle::channel();
        drop(rx);

        let relay = ChannelRelay::new(handle);
        let err = relay.recognize("data:image/png;base64,AAAA").await.unwrap_err();
        assert!(matches!(err, RelayError::Channel(ChannelError::Closed)));
    }

    #[test]
    fn test_result_into_reply() {
        let reply: OcrReply = Err::<String, _>(RelayError::MissingApiKey).into();
        assert!(matches!(reply, OcrReply::Error { error } if error.starts_with("No API key configured")));
    }
}
