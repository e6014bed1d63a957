mod local;
mod session;

pub use local::{LocalStore, StoreError, API_KEY_SETTING};
pub use session::{ScanStateStore, SessionStore};
