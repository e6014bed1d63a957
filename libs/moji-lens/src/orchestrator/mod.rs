mod scanner;
mod types;

pub use scanner::Scanner;
pub use types::{is_fatal_error, NoopSink, ProgressSink, ScanConfig, ScanError, ScanGuard, ScanPermit};
