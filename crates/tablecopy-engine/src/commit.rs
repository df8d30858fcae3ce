//! Commit policy: batch size and commit-every folded into one setting

use crate::mode::CopyMode;

/// When rows are submitted and when the unit of work is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Rows execute one at a time; commit every `every` rows, 0 meaning
    /// once at the end.
    RowCommit { every: u64 },
    /// Rows are queued into driver batches of `size`; with
    /// `commit_each_batch` a commit follows every batch, otherwise once at
    /// the end.
    Batch { size: usize, commit_each_batch: bool },
}

impl Default for CommitPolicy {
    fn default() -> Self {
        CommitPolicy::RowCommit { every: 0 }
    }
}

impl CommitPolicy {
    /// Fold the two user-facing settings into one policy.
    ///
    /// `batch_size > 0` selects batch mode and turns `commit_every > 0` into
    /// the commit-each-batch flag. Batch mode falls back to row commits,
    /// keeping the batch size as the commit interval when commit-each-batch
    /// was requested, if the target cannot run batches or if `mode` needs a
    /// per-row fallback statement. The second value explains a fallback.
    pub fn resolve(
        batch_size: usize,
        commit_every: u64,
        supports_batch_updates: bool,
        mode: CopyMode,
    ) -> (Self, Option<String>) {
        if batch_size == 0 {
            return (CommitPolicy::RowCommit { every: commit_every }, None);
        }

        let commit_each_batch = commit_every > 0;
        let fallback = CommitPolicy::RowCommit {
            every: if commit_each_batch { batch_size as u64 } else { 0 },
        };

        if !supports_batch_updates {
            return (
                fallback,
                Some(format!(
                    "Target does not support batch updates; batch size {} ignored, rows are written individually",
                    batch_size
                )),
            );
        }
        if mode.is_combined() {
            return (
                fallback,
                Some(format!(
                    "Mode '{}' needs a per-row fallback statement; batch size {} ignored, rows are written individually",
                    mode, batch_size
                )),
            );
        }

        (
            CommitPolicy::Batch {
                size: batch_size,
                commit_each_batch,
            },
            None,
        )
    }

    pub fn batch_size(&self) -> Option<usize> {
        match self {
            CommitPolicy::Batch { size, .. } => Some(*size),
            CommitPolicy::RowCommit { .. } => None,
        }
    }

    /// Whether a commit is due after `rows_in_unit` rows in row mode
    pub fn row_commit_due(&self, rows_in_unit: u64) -> bool {
        match self {
            CommitPolicy::RowCommit { every } => *every > 0 && rows_in_unit >= *every,
            CommitPolicy::Batch { .. } => false,
        }
    }
}

impl std::fmt::Display for CommitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitPolicy::RowCommit { every: 0 } => write!(f, "row-by-row, commit at end"),
            CommitPolicy::RowCommit { every } => write!(f, "row-by-row, commit every {} rows", every),
            CommitPolicy::Batch {
                size,
                commit_each_batch: true,
            } => write!(f, "batches of {}, commit each batch", size),
            CommitPolicy::Batch { size, .. } => write!(f, "batches of {}, commit at end", size),
        }
    }
}
