use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::background::{BackgroundContext, BadgeState, Badges, TabRegistry};
use crate::common::TabId;
use crate::content::PageContext;
use crate::image2text::{ChannelRelay, VisionClient, VisionConfig};
use crate::image_utils::{HttpImageFetcher, ImageFetcher};
use crate::messaging::{ContextHandle, Message, PageStatus};
use crate::orchestrator::{ScanConfig, Scanner};
use crate::page::{Document, SharedDocument};
use crate::popup::Popup;
use crate::store::{LocalStore, SessionStore};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

pub struct Tab {
    id: TabId,
    document: SharedDocument,
    handle: ContextHandle,
    status: PageStatus,
}

impl Tab {
    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn status(&self) -> PageStatus {
        self.status
    }

    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }
}

pub struct Runtime {
    store: LocalStore,
    session: SessionStore,
    tabs: TabRegistry,
    badges: Badges,
    background: ContextHandle,
    events: broadcast::Sender<Message>,
    fetcher: Arc<dyn ImageFetcher>,
    scan: ScanConfig,
    next_tab: AtomicU32,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub fn start(store: LocalStore, config: RuntimeConfig) -> Self {
        Self::start_with_fetcher(store, config, Arc::new(HttpImageFetcher::new()))
    }

    pub fn start_with_fetcher(store: LocalStore, config: RuntimeConfig, fetcher: Arc<dyn ImageFetcher>) -> Self {
        let tabs = TabRegistry::default();
        let badges = Badges::default();
        let background_ctx = BackgroundContext::new(
            store.clone(),
            VisionClient::new(config.vision),
            tabs.clone(),
            badges.clone(),
        );
        let events = background_ctx.events();
        let (background, inbox) = ContextHandle::channel();
        let task = background_ctx.spawn(inbox);

        Self {
            store,
            session: SessionStore::new(),
            tabs,
            badges,
            background,
            events,
            fetcher,
            scan: config.scan,
            next_tab: AtomicU32::new(1),
            tasks: Mutex::new(vec![task]),
        }
    }

    pub async fn open_page(&self, document: Document) -> Tab {
        let id = self.next_tab.fetch_add(1, Ordering::SeqCst);
        let doc = document.into_shared();
        let to_background = self.background.from_tab(id);

        let scanner = Scanner::new(self.fetcher.clone(), Arc::new(ChannelRelay::new(to_background.clone())))
            .with_store(self.store.clone())
            .with_sink(Arc::new(to_background))
            .with_config(self.scan.clone());
        let page = PageContext::new(id, doc.clone(), scanner, self.session.tab(id), self.background.clone());
        let status = page.on_load().await;

        let (handle, inbox) = ContextHandle::channel();
        self.tabs.register(id, handle.clone());
        self.tasks.lock().push(page.spawn(inbox));

        Tab {
            id,
            document: doc,
            handle,
            status,
        }
    }

    pub fn close_page(&self, tab_id: TabId) {
        self.tabs.unregister(tab_id);
        self.badges.remove(tab_id);
    }

    pub fn popup(&self, tab_id: TabId) -> Popup {
        Popup::new(
            tab_id,
            self.background.clone(),
            self.tabs.clone(),
            self.session.clone(),
            self.store.clone(),
        )
    }

    pub fn badge(&self, tab_id: TabId) -> Option<BadgeState> {
        self.badges.get(tab_id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Message> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
