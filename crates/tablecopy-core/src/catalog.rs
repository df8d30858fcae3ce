//! Column catalog and schema mutation contracts

use crate::{ColumnDescriptor, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Parse `schema.table` or `table`.
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
                Self::new(name.trim()).with_schema(schema.trim())
            }
            _ => Self::new(qualified.trim()),
        }
    }

    /// Render the name with each part passed through `quote`.
    pub fn qualified(&self, quote: impl Fn(&str) -> String) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.name)),
            None => quote(&self.name),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Column metadata lookup for existing tables.
#[async_trait]
pub trait ColumnCatalog: Send + Sync {
    /// Columns of `table` in ordinal order, with primary-key flags.
    async fn describe_columns(&self, table: &TableRef) -> Result<Vec<ColumnDescriptor>>;

    /// Whether `table` exists.
    async fn table_exists(&self, table: &TableRef) -> Result<bool>;
}

/// Minimal DDL needed to stage a brand-new target table.
#[async_trait]
pub trait SchemaMutation: Send + Sync {
    /// Create `table` with `columns`; primary-key flags become the table's key.
    async fn create_table(&self, table: &TableRef, columns: &[ColumnDescriptor]) -> Result<()>;

    /// Drop `table`. With `ignore_errors` set, failures are logged and swallowed.
    async fn drop_table(&self, table: &TableRef, ignore_errors: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qualified_names() {
        assert_eq!(TableRef::parse("main.person"), TableRef::new("person").with_schema("main"));
        assert_eq!(TableRef::parse("person"), TableRef::new("person"));
        assert_eq!(TableRef::parse(".person"), TableRef::new(".person"));
    }

    #[test]
    fn test_qualified_rendering() {
        let table = TableRef::new("person").with_schema("main");
        assert_eq!(table.qualified(|s| format!("\"{}\"", s)), "\"main\".\"person\"");
        assert_eq!(table.to_string(), "main.person");
    }
}
