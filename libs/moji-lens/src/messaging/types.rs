use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::common::TabId;

/// Every message exchanged between contexts, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Page → background: Japanese page with `count` scannable images
    SetBadge { count: usize },
    /// Page → background → popup
    ScanProgress { completed: usize, total: usize },
    /// Page → background → popup
    ScanComplete,
    /// Popup → background, relayed to the tab as `START_SCAN`
    StartScanRequest {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
    /// Background → page
    StartScan,
    /// Page → background, answered with [`OcrReply`]
    ClaudeOcr {
        #[serde(rename = "dataUrl")]
        data_url: String,
    },
    /// Popup → page, answered with [`PageStatus`]
    GetStatus,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SetBadge { .. } => "SET_BADGE",
            Message::ScanProgress { .. } => "SCAN_PROGRESS",
            Message::ScanComplete => "SCAN_COMPLETE",
            Message::StartScanRequest { .. } => "START_SCAN_REQUEST",
            Message::StartScan => "START_SCAN",
            Message::ClaudeOcr { .. } => "CLAUDE_OCR",
            Message::GetStatus => "GET_STATUS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OcrReply {
    Text { text: String },
    Error { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStatus {
    pub has_japanese: bool,
    pub image_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Ocr(OcrReply),
    Status(PageStatus),
    ScanFinished { done: bool },
}

#[derive(Debug)]
pub struct Envelope {
    pub message: Message,
    /// Tab the message came from, `None` for the popup and background
    pub sender: Option<TabId>,
    pub reply: Option<oneshot::Sender<Reply>>,
}

impl Envelope {
    /// Answer the request. Answering a notification, or a requester that
    /// already went away, is a no-op.
    pub fn respond(&mut self, reply: Reply) {
        if let Some(tx) = self.reply.take() {
            if tx.send(reply).is_err() {
                log::debug!("Requester for {} went away before the reply", self.message.kind());
            }
        }
    }
}
