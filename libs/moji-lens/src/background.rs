use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::common::TabId;
use crate::image2text::{handle_claude_ocr, VisionClient};
use crate::messaging::{ContextHandle, Envelope, Message, Reply};
use crate::store::LocalStore;

pub const DETECTED_COLOR: &str = "#666";
pub const SCANNING_COLOR: &str = "#2196F3";
pub const DONE_COLOR: &str = "#4CAF50";

const EVENTS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadgeState {
    pub text: String,
    pub color: String,
}

impl BadgeState {
    pub fn detected(count: usize) -> Self {
        Self {
            text: count.to_string(),
            color: DETECTED_COLOR.to_string(),
        }
    }

    pub fn scanning(completed: usize, total: usize) -> Self {
        Self {
            text: format!("{}/{}", completed, total),
            color: SCANNING_COLOR.to_string(),
        }
    }

    pub fn done() -> Self {
        Self {
            text: "✓".to_string(),
            color: DONE_COLOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Badges {
    inner: Arc<RwLock<HashMap<TabId, BadgeState>>>,
}

impl Badges {
    pub fn get(&self, tab_id: TabId) -> Option<BadgeState> {
        self.inner.read().get(&tab_id).cloned()
    }

    pub fn set(&self, tab_id: TabId, badge: BadgeState) {
        log::debug!("Badge for tab {}: {} ({})", tab_id, badge.text, badge.color);
        self.inner.write().insert(tab_id, badge);
    }

    pub fn remove(&self, tab_id: TabId) {
        self.inner.write().remove(&tab_id);
    }
}

#[derive(Debug, Clone, Default)]
pub struct TabRegistry {
    tabs: Arc<RwLock<HashMap<TabId, ContextHandle>>>,
}

impl TabRegistry {
    pub fn register(&self, tab_id: TabId, handle: ContextHandle) {
        self.tabs.write().insert(tab_id, handle);
    }

    pub fn unregister(&self, tab_id: TabId) -> Option<ContextHandle> {
        self.tabs.write().remove(&tab_id)
    }

    pub fn get(&self, tab_id: TabId) -> Option<ContextHandle> {
        self.tabs.read().get(&tab_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tabs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.read().is_empty()
    }
}

pub struct BackgroundContext {
    store: LocalStore,
    vision: VisionClient,
    tabs: TabRegistry,
    badges: Badges,
    events: broadcast::Sender<Message>,
}

impl BackgroundContext {
    pub fn new(store: LocalStore, vision: VisionClient, tabs: TabRegistry, badges: Badges) -> Self {
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            store,
            vision,
            tabs,
            badges,
            events,
        }
    }

    pub fn events(&self) -> broadcast::Sender<Message> {
        self.events.clone()
    }

    pub fn spawn(self, mut inbox: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::debug!("Background context started");
            while let Some(envelope) = inbox.recv().await {
                self.dispatch(envelope).await;
            }
            log::debug!("Background context stopped");
        })
    }

    async fn dispatch(&self, envelope: Envelope) {
        let Envelope {
            message,
            sender,
            reply,
        } = envelope;

        match message {
            Message::SetBadge { count } => {
                if let Some(tab_id) = sender {
                    self.badges.set(tab_id, BadgeState::detected(count));
                }
            }
            Message::ScanProgress { completed, total } => {
                if let Some(tab_id) = sender {
                    self.badges.set(tab_id, BadgeState::scanning(completed, total));
                    self.forward(message);
                }
            }
            Message::ScanComplete => {
                if let Some(tab_id) = sender {
                    self.badges.set(tab_id, BadgeState::done());
                    self.forward(message);
                }
            }
            Message::StartScanRequest { tab_id } => match (self.tabs.get(tab_id), reply) {
                (Some(tab), Some(reply)) => {
                    // the tab answers when its scan ends, keep the loop free meanwhile
                    tokio::spawn(async move {
                        match tab.request(Message::StartScan).await {
                            Ok(finished) => {
                                let _ = reply.send(finished);
                            }
                            Err(e) => log::warn!("Could not start scan in tab {}: {}", tab_id, e),
                        }
                    });
                }
                (Some(tab), None) => {
                    if let Err(e) = tab.send(Message::StartScan).await {
                        log::warn!("Could not start scan in tab {}: {}", tab_id, e);
                    }
                }
                (None, _) => log::warn!("START_SCAN_REQUEST for unknown tab {}", tab_id),
            },
            Message::ClaudeOcr { data_url } => {
                let store = self.store.clone();
                let vision = self.vision.clone();
                tokio::spawn(async move {
                    let result = handle_claude_ocr(&store, &vision, &data_url).await;
                    if let Err(e) = &result {
                        log::warn!("Vision request failed: {}", e);
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(Reply::Ocr(result.into()));
                    }
                });
            }
            other => log::debug!("Background ignoring {}", other.kind()),
        }
    }

    fn forward(&self, message: Message) {
        // no popup open is not an error
        let _ = self.events.send(message);
    }
}
