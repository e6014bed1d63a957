use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::image_utils::NormalizeConfig;
use crate::locator::MIN_IMAGE_SIZE;

pub const DEFAULT_CONCURRENCY: usize = 3;

static FATAL_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)credit balance|api key|unauthorized|authentication").expect("valid fatal error regex")
});

/// Errors that make every further request pointless: the scan stops
/// dispatching once one of these is seen.
pub fn is_fatal_error(message: &str) -> bool {
    FATAL_ERROR_RE.is_match(message)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Number of workers draining the queue
    pub concurrency: usize,
    pub min_image_size: f64,
    pub normalize: NormalizeConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            min_image_size: MIN_IMAGE_SIZE,
            normalize: NormalizeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScanError {
    #[error("A scan is already running on this page")]
    AlreadyRunning,
}

/// Receives `SCAN_PROGRESS` / `SCAN_COMPLETE` notifications.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn progress(&self, completed: usize, total: usize);
    async fn complete(&self);
}

pub struct NoopSink;

#[async_trait]
impl ProgressSink for NoopSink {
    async fn progress(&self, _completed: usize, _total: usize) {}
    async fn complete(&self) {}
}

/// Allows at most one scan per page at a time.
#[derive(Debug, Clone, Default)]
pub struct ScanGuard {
    running: Arc<AtomicBool>,
}

impl ScanGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn try_begin(&self) -> Result<ScanPermit, ScanError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ScanError::AlreadyRunning)?;
        Ok(ScanPermit {
            running: self.running.clone(),
        })
    }
}

/// Held for the duration of a scan; releases the guard on drop.
#[derive(Debug)]
pub struct ScanPermit {
    running: Arc<AtomicBool>,
}

impl Drop for ScanPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
