use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::watch;

use crate::background::TabRegistry;
use crate::common::{ScanState, ScanStatus, TabId};
use crate::messaging::{ChannelError, ContextHandle, Message, PageStatus, Reply};
use crate::orchestrator::ScanError;
use crate::store::{LocalStore, SessionStore, StoreError};

static CREDIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)credit balance").expect("valid regex"));
static NO_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)No API key configured").expect("valid regex"));
static BAD_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)api key|unauthorized|authentication").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanView {
    pub status: ScanStatus,
    pub headline: String,
    pub detail: String,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupInit {
    Scan(ScanView),
    Page { line: String, can_scan: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum PopupError {
    #[error("No active tab")]
    NoActiveTab,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scan(#[from] ScanError),
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Replace well-known API failures with what the user should do about them.
pub fn error_hint(last_error: &str) -> String {
    if last_error.is_empty() {
        "Unknown error".to_string()
    } else if CREDIT_RE.is_match(last_error) {
        "Insufficient API credits. Add credits at console.anthropic.com".to_string()
    } else if NO_KEY_RE.is_match(last_error) {
        "No API key. Add your Anthropic key below.".to_string()
    } else if BAD_KEY_RE.is_match(last_error) {
        "Invalid API key. Check your key below.".to_string()
    } else {
        last_error.to_string()
    }
}

pub fn render_scan_state(state: &ScanState) -> ScanView {
    match state.status {
        ScanStatus::Scanning => {
            let mut detail = format!("{} / {}", state.completed, state.total);
            if state.errors > 0 {
                detail.push_str(&format!(" ({} failed)", state.errors));
            }
            ScanView {
                status: state.status,
                headline: "Scanning...".to_string(),
                detail,
                percent: state.percent(),
            }
        }
        ScanStatus::Error => ScanView {
            status: state.status,
            headline: "Scan stopped".to_string(),
            detail: error_hint(&state.last_error),
            percent: 100,
        },
        ScanStatus::Done => {
            let mut headline = format!("Done — found text in {} image{}", state.found, plural(state.found));
            if state.errors > 0 {
                headline.push_str(&format!(" ({} failed)", state.errors));
            }
            let mut detail = "Use Ctrl+F to search".to_string();
            if state.cache_hits > 0 {
                detail.push_str(&format!(" · {} cached", state.cache_hits));
            }
            ScanView {
                status: state.status,
                headline,
                detail,
                percent: 100,
            }
        }
    }
}

pub fn render_page_status(status: Result<PageStatus, ChannelError>) -> (String, bool) {
    match status {
        Ok(status) if status.has_japanese => (
            format!(
                "Japanese detected · {} image{} found",
                status.image_count,
                plural(status.image_count)
            ),
            status.image_count > 0,
        ),
        Ok(_) => ("No Japanese text detected on this page".to_string(), false),
        Err(_) => ("Cannot access this page (reload may help)".to_string(), false),
    }
}

pub struct Popup {
    tab_id: TabId,
    background: ContextHandle,
    tabs: TabRegistry,
    session: SessionStore,
    store: LocalStore,
}

impl Popup {
    pub fn new(
        tab_id: TabId,
        background: ContextHandle,
        tabs: TabRegistry,
        session: SessionStore,
        store: LocalStore,
    ) -> Self {
        Self {
            tab_id,
            background,
            tabs,
            session,
            store,
        }
    }

    async fn page_status(&self) -> Result<PageStatus, ChannelError> {
        let tab = self.tabs.get(self.tab_id).ok_or(ChannelError::Closed)?;
        match tab.request(Message::GetStatus).await? {
            Reply::Status(status) => Ok(status),
            other => {
                log::warn!("Unexpected GET_STATUS reply: {:?}", other);
                Err(ChannelError::NoResponse)
            }
        }
    }

    pub async fn init(&self) -> PopupInit {
        if let Some(state) = self.session.scan_state(self.tab_id) {
            return PopupInit::Scan(render_scan_state(&state));
        }
        let (line, can_scan) = render_page_status(self.page_status().await);
        PopupInit::Page { line, can_scan }
    }

    /// Start a scan of the tab and follow it until it finishes, calling
    /// `on_update` for every state change. A page that is still busy with an
    /// earlier scan rejects the request; the popup then reports that scan.
    pub async fn start_scan<F>(&self, mut on_update: F) -> Result<ScanState, PopupError>
    where
        F: FnMut(&ScanView),
    {
        if self.tabs.get(self.tab_id).is_none() {
            return Err(PopupError::NoActiveTab);
        }

        let tab_state = self.session.tab(self.tab_id);
        let mut rx = tab_state.subscribe();
        let stored = rx.borrow_and_update().clone();
        if let Some(state) = stored.filter(ScanState::is_scanning) {
            log::debug!("Tab {} is already scanning", self.tab_id);
            on_update(&render_scan_state(&state));
            return follow(&mut rx, &mut on_update).await;
        }

        let request = self.background.request(Message::StartScanRequest { tab_id: self.tab_id });
        tokio::pin!(request);
        loop {
            tokio::select! {
                reply = &mut request => {
                    let accepted = matches!(reply?, Reply::ScanFinished { done: true });
                    if !accepted {
                        log::info!("Tab {} is still busy with an earlier scan", self.tab_id);
                    }
                    return match tab_state.snapshot() {
                        Some(state) if accepted || !state.is_scanning() => {
                            on_update(&render_scan_state(&state));
                            Ok(state)
                        }
                        Some(state) => {
                            on_update(&render_scan_state(&state));
                            follow(&mut rx, &mut on_update).await
                        }
                        None if accepted => Err(ChannelError::NoResponse.into()),
                        None => Err(ScanError::AlreadyRunning.into()),
                    };
                }
                changed = rx.changed() => {
                    changed.map_err(|_| ChannelError::Closed)?;
                    let current = rx.borrow_and_update().clone();
                    if let Some(state) = current {
                        on_update(&render_scan_state(&state));
                        if !state.is_scanning() {
                            return Ok(state);
                        }
                    }
                }
            }
        }
    }

    pub fn api_key(&self) -> Result<Option<String>, PopupError> {
        Ok(self.store.api_key()?)
    }

    pub fn set_api_key(&self, key: &str) -> Result<(), PopupError> {
        self.store.set_api_key(key)?;
        log::info!("API key saved");
        Ok(())
    }
}

async fn follow<F>(rx: &mut watch::Receiver<Option<ScanState>>, on_update: &mut F) -> Result<ScanState, PopupError>
where
    F: FnMut(&ScanView),
{
    loop {
        rx.changed().await.map_err(|_| ChannelError::Closed)?;
        let current = rx.borrow_and_update().clone();
        if let Some(state) = current {
            on_update(&render_scan_state(&state));
            if !state.is_scanning() {
                return Ok(state);
            }
        }
    }
}
