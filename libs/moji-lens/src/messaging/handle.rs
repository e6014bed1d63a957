use tokio::sync::{mpsc, oneshot};

use super::types::{Envelope, Message, Reply};
use crate::common::TabId;

const DEFAULT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Could not establish connection. Receiving end does not exist.")]
    Closed,

    #[error("The message port closed before a response was received.")]
    NoResponse,
}

#[derive(Debug, Clone)]
pub struct ContextHandle {
    tx: mpsc::Sender<Envelope>,
    sender: Option<TabId>,
}

impl ContextHandle {
    pub fn channel() -> (Self, mpsc::Receiver<Envelope>) {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx, sender: None }, rx)
    }

    pub fn from_tab(&self, tab_id: TabId) -> Self {
        Self {
            tx: self.tx.clone(),
            sender: Some(tab_id),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn send(&self, message: Message) -> Result<(), ChannelError> {
        let envelope = Envelope {
            message,
            sender: self.sender,
            reply: None,
        };
        self.tx.send(envelope).await.map_err(|_| ChannelError::Closed)
    }

    pub async fn request(&self, message: Message) -> Result<Reply, ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            message,
            sender: self.sender,
            reply: Some(reply_tx),
        };
        self.tx.send(envelope).await.map_err(|_| ChannelError::Closed)?;
        reply_rx.await.map_err(|_| ChannelError::NoResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::PageStatus;

    #[tokio::test]
    async fn test_request_reply() {
        let (handle, mut rx) = ContextHandle::channel();
        let tab = handle.from_tab(3);

        let server = tokio::spawn(async move {
            let mut envelope = rx.recv().await.unwrap();
            assert_eq!(envelope.sender, Some(3));
            assert_eq!(envelope.message, Message::GetStatus);
            envelope.respond(Reply::Status(PageStatus {
                has_japanese: true,
                image_count: 1,
            }));
        });

        let reply = tab.request(Message::GetStatus).await.unwrap();
        assert!(matches!(reply, Reply::Status(s) if s.has_japanese));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_inbox_rejects() {
        let (handle, rx) = ContextHandle::channel();
        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(handle.send(Message::ScanComplete).await, Err(ChannelError::Closed)));
        assert!(matches!(handle.request(Message::GetStatus).await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_unanswered_request_rejects_instead_of_hanging() {
        let (handle, mut rx) = ContextHandle::channel();
        tokio::spawn(async move {
            // receive and drop without responding
            let _ = rx.recv().await;
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            handle.request(Message::GetStatus),
        )
        .await
        .expect("request should not hang");
        assert!(matches!(result, Err(ChannelError::NoResponse)));
    }
}
