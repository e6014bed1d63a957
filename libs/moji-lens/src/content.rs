use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{ScanState, TabId};
use crate::detector::contains_japanese;
use crate::locator::collect_image_candidates;
use crate::messaging::{ContextHandle, Envelope, Message, PageStatus, Reply};
use crate::orchestrator::{ProgressSink, ScanError, ScanGuard, Scanner};
use crate::page::SharedDocument;
use crate::store::ScanStateStore;

#[async_trait]
impl ProgressSink for ContextHandle {
    async fn progress(&self, completed: usize, total: usize) {
        if let Err(e) = self.send(Message::ScanProgress { completed, total }).await {
            log::debug!("Dropping progress {}/{}: {}", completed, total, e);
        }
    }

    async fn complete(&self) {
        if let Err(e) = self.send(Message::ScanComplete).await {
            log::debug!("Dropping scan completion: {}", e);
        }
    }
}

#[derive(Clone)]
pub struct PageContext {
    tab_id: TabId,
    doc: SharedDocument,
    scanner: Scanner,
    state: ScanStateStore,
    guard: ScanGuard,
    background: ContextHandle,
}

impl PageContext {
    pub fn new(
        tab_id: TabId,
        doc: SharedDocument,
        scanner: Scanner,
        state: ScanStateStore,
        background: ContextHandle,
    ) -> Self {
        Self {
            tab_id,
            doc,
            scanner,
            state,
            guard: ScanGuard::new(),
            background: background.from_tab(tab_id),
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn document(&self) -> &SharedDocument {
        &self.doc
    }

    pub fn detect(&self) -> PageStatus {
        let doc = self.doc.lock();
        PageStatus {
            has_japanese: contains_japanese(&doc.inner_text()),
            image_count: collect_image_candidates(&doc, self.scanner.config().min_image_size).len(),
        }
    }

    pub async fn on_load(&self) -> PageStatus {
        self.state.clear();
        let status = self.detect();
        log::info!(
            "Tab {}: japanese={} images={}",
            self.tab_id,
            status.has_japanese,
            status.image_count
        );
        if status.has_japanese && status.image_count > 0 {
            let badge = Message::SetBadge {
                count: status.image_count,
            };
            if let Err(e) = self.background.send(badge).await {
                log::warn!("Tab {}: could not set badge: {}", self.tab_id, e);
            }
        }
        status
    }

    pub async fn scan(&self) -> Result<ScanState, ScanError> {
        let _permit = self.guard.try_begin()?;
        self.state.clear();
        Ok(self.scanner.run(&self.doc, &self.state).await)
    }

    pub fn spawn(self, mut inbox: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                self.dispatch(envelope);
            }
            log::debug!("Tab {} closed", self.tab_id);
        })
    }

    fn dispatch(&self, mut envelope: Envelope) {
        match envelope.message {
            Message::GetStatus => {
                let status = self.detect();
                envelope.respond(Reply::Status(status));
            }
            Message::StartScan => {
                let page = self.clone();
                tokio::spawn(async move {
                    let done = match page.scan().await {
                        Ok(_) => true,
                        Err(e) => {
                            log::warn!("Tab {}: {}", page.tab_id, e);
                            false
                        }
                    };
                    envelope.respond(Reply::ScanFinished { done });
                });
            }
            _ => log::debug!("Tab {} ignoring {}", self.tab_id, envelope.message.kind()),
        }
    }
}
