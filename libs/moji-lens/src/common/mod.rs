mod utils;
mod types;

pub use utils::init_logger;
pub use utils::init_logger_exe;
pub use types::{CandidateKind, ImageCandidate, ScanState, ScanStatus, TabId};
