use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::common::{ScanState, TabId};

#[derive(Clone)]
pub struct ScanStateStore {
    tx: Arc<watch::Sender<Option<ScanState>>>,
}

impl Default for ScanStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanStateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, state: ScanState) {
        self.tx.send_replace(Some(state));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn snapshot(&self) -> Option<ScanState> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ScanState>> {
        self.tx.subscribe()
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    tabs: Arc<RwLock<HashMap<TabId, ScanStateStore>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tab(&self, tab_id: TabId) -> ScanStateStore {
        if let Some(store) = self.tabs.read().get(&tab_id) {
            return store.clone();
        }
        self.tabs.write().entry(tab_id).or_default().clone()
    }

    pub fn scan_state(&self, tab_id: TabId) -> Option<ScanState> {
        self.tabs.read().get(&tab_id).and_then(|s| s.snapshot())
    }
}
