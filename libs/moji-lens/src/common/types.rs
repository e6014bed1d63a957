use serde::{Deserialize, Serialize};

use crate::page::NodeKey;

pub type TabId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateKind {
    #[serde(rename = "img")]
    Img,
    #[serde(rename = "bg")]
    Background,
}

impl std::fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateKind::Img => write!(f, "img"),
            CandidateKind::Background => write!(f, "bg"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageCandidate {
    pub element: NodeKey,
    pub url: String,
    pub kind: CandidateKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Scanning,
    Done,
    Error,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Scanning => write!(f, "scanning"),
            ScanStatus::Done => write!(f, "done"),
            ScanStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanState {
    pub status: ScanStatus,
    pub completed: usize,
    pub total: usize,
    pub found: usize,
    #[serde(default)]
    pub errors: usize,
    #[serde(default)]
    pub last_error: String,
    #[serde(default)]
    pub cache_hits: usize,
}

impl ScanState {
    pub fn scanning(total: usize) -> Self {
        Self {
            status: ScanStatus::Scanning,
            completed: 0,
            total,
            found: 0,
            errors: 0,
            last_error: String::new(),
            cache_hits: 0,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.status == ScanStatus::Scanning
    }

    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed as f64 / self.total as f64) * 100.0).round() as u32
    }
}
