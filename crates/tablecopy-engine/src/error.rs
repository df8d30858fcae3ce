//! Errors raised by the copy engine

use tablecopy_core::CoreError;
use thiserror::Error;

/// How an error affects a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Mode/key validation or a bad mapping; fatal before any row moves
    Configuration,
    /// Target create/drop failed; fatal unless drop errors are ignored
    Schema,
    /// A single row could not be read or written
    Row,
    /// Terminal, not a failure
    Cancellation,
    /// Connection or worker infrastructure failure
    Infrastructure,
}

/// Errors during a copy
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown copy mode '{0}', expected one of: insert, update, insert,update, update,insert")]
    InvalidMode(String),

    #[error("Copy mode '{0}' requires key columns but none are mapped")]
    MissingKeyColumns(String),

    #[error("Copy mode '{0}' has no updatable columns: every mapped column is a key column")]
    NoUpdatableColumns(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Read error at row {row}: {message}")]
    SourceRead { row: u64, message: String },

    #[error("Write error at row {row}: {message}")]
    Write { row: u64, message: String },

    #[error("Copy cancelled")]
    Cancelled,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Copy worker failed: {0}")]
    Worker(String),
}

impl CopyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CopyError::Configuration(_)
            | CopyError::InvalidMode(_)
            | CopyError::MissingKeyColumns(_)
            | CopyError::NoUpdatableColumns(_) => ErrorClass::Configuration,
            CopyError::Schema(_) => ErrorClass::Schema,
            CopyError::SourceRead { .. } | CopyError::Write { .. } => ErrorClass::Row,
            CopyError::Cancelled => ErrorClass::Cancellation,
            CopyError::Connection(_) | CopyError::Worker(_) => ErrorClass::Infrastructure,
        }
    }

    /// Whether continue-on-error may skip past this error
    pub fn is_row_level(&self) -> bool {
        self.class() == ErrorClass::Row
    }
}

impl From<CoreError> for CopyError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Schema(message) => CopyError::Schema(message),
            CoreError::Configuration(message) => CopyError::Configuration(message),
            CoreError::Cancelled => CopyError::Cancelled,
            other => CopyError::Connection(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(CopyError::InvalidMode("upsert".into()).class(), ErrorClass::Configuration);
        assert_eq!(CopyError::Schema("x".into()).class(), ErrorClass::Schema);
        assert!(CopyError::Write { row: 3, message: "dup".into() }.is_row_level());
        assert!(!CopyError::Cancelled.is_row_level());
    }

    #[test]
    fn test_core_errors_keep_their_class() {
        let err: CopyError = CoreError::Schema("drop failed".into()).into();
        assert!(matches!(err, CopyError::Schema(_)));
        let err: CopyError = CoreError::database("locked").into();
        assert_eq!(err.class(), ErrorClass::Infrastructure);
    }
}
