//! Outcome of a copy run

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::commit::CommitPolicy;
use crate::mode::CopyMode;

/// Terminal state of a run that got past configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStatus {
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyStatus::Completed => write!(f, "completed"),
            CopyStatus::Failed => write!(f, "failed"),
            CopyStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

pub const DEFAULT_MAX_WARNINGS: usize = 1_000;

/// Warning messages, keeping only the most recent `capacity` entries.
#[derive(Debug, Clone, Serialize)]
pub struct WarningLog {
    entries: VecDeque<String>,
    total: u64,
    capacity: usize,
}

impl Default for WarningLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WARNINGS)
    }
}

impl WarningLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            total: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.total += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message.into());
    }

    /// Retained messages, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Every warning ever pushed, retained or not
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn dropped(&self) -> u64 {
        self.total - self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Counts, warnings and errors of one run.
#[derive(Debug, Clone, Serialize)]
pub struct CopyResult {
    pub status: CopyStatus,
    pub target: String,
    pub mode: String,
    pub commit_policy: String,
    /// Rows pulled from the source, including rejected ones
    pub rows_processed: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Rows an update matched nothing for
    pub unmatched: u64,
    /// Rows skipped under continue-on-error
    pub rejected: u64,
    pub batches_executed: u64,
    pub commits: u64,
    pub warnings: WarningLog,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CopyResult {
    pub fn new(target: impl Into<String>, mode: CopyMode, max_warnings: usize) -> Self {
        Self {
            status: CopyStatus::Completed,
            target: target.into(),
            mode: mode.to_string(),
            commit_policy: CommitPolicy::default().to_string(),
            rows_processed: 0,
            inserted: 0,
            updated: 0,
            unmatched: 0,
            rejected: 0,
            batches_executed: 0,
            commits: 0,
            warnings: WarningLog::new(max_warnings),
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Rows written to the target
    pub fn rows_written(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn is_success(&self) -> bool {
        self.status == CopyStatus::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == CopyStatus::Cancelled
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    pub(crate) fn finish(&mut self, status: CopyStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}
