//! Savepoint support for database transactions

use crate::Result;
use async_trait::async_trait;

/// A named rollback point within a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Savepoint name for the `seq`-th guarded statement of a run.
    ///
    /// Only ASCII letters, digits and underscores are produced so the name
    /// never needs quoting.
    pub fn for_sequence(prefix: &str, seq: u64) -> Self {
        let prefix: String = prefix
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Self::new(format!("{}_{}", prefix, seq))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Transactions that can roll back part of their work.
///
/// Used to isolate a single failing statement on stores where an error
/// otherwise poisons the whole transaction.
#[async_trait]
pub trait SavepointSupport: Send + Sync {
    /// Create a savepoint with the given name.
    async fn savepoint(&self, name: &str) -> Result<Savepoint>;

    /// Undo everything done after `name` was created. The savepoint stays valid.
    async fn rollback_to_savepoint(&self, name: &str) -> Result<()>;

    /// Release (forget) a savepoint without undoing its work.
    async fn release_savepoint(&self, name: &str) -> Result<()>;

    fn supports_savepoints(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_savepoint_new() {
        let sp = Savepoint::new("test_savepoint");
        assert_eq!(sp.name(), "test_savepoint");
    }

    #[test]
    fn test_savepoint_for_sequence_sanitizes_prefix() {
        let sp = Savepoint::for_sequence("copy-row.x", 42);
        assert_eq!(sp.name(), "copy_row_x_42");
    }

    #[test]
    fn test_savepoint_equality() {
        let sp1 = Savepoint::new("same");
        let sp2 = Savepoint::new("same");
        let sp3 = Savepoint::new("different");

        assert_eq!(sp1, sp2);
        assert_ne!(sp1, sp3);
    }
}
