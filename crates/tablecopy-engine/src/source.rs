//! Row sources: table scans, queries and custom producers
//!
//! A source is consumed exactly once. Its column shape is available before
//! it is opened so mapping can be resolved before any data flows.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tablecopy_core::{ColumnDescriptor, Connection, RowStream, TableRef, Value};

use crate::error::CopyError;

/// Assumed average size of one row when only a byte count is known
pub const AVERAGE_ROW_BYTES: u64 = 80;

/// How large a source expects to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeEstimate {
    Rows(u64),
    Bytes(u64),
    Unknown,
}

impl SizeEstimate {
    /// Best guess at the number of rows
    pub fn estimated_rows(&self) -> Option<u64> {
        match self {
            SizeEstimate::Rows(rows) => Some(*rows),
            SizeEstimate::Bytes(bytes) => Some((bytes / AVERAGE_ROW_BYTES).max(1)),
            SizeEstimate::Unknown => None,
        }
    }
}

/// Producer of rows for a copy.
#[async_trait]
pub trait RowSource: Send {
    /// Short label used in logs
    fn label(&self) -> String;

    /// Column shape, in the order values are produced.
    async fn columns(&mut self) -> Result<Vec<ColumnDescriptor>, CopyError>;

    /// Start producing rows.
    async fn open(&mut self) -> Result<(), CopyError>;

    /// Next row, `None` once exhausted. An `Err` describes one unreadable
    /// row; callers may keep pulling after it.
    async fn next_row(&mut self) -> Option<Result<Vec<Value>, CopyError>>;

    async fn estimated_size(&mut self) -> SizeEstimate {
        SizeEstimate::Unknown
    }

    /// Release the underlying cursor or file. Safe to call more than once.
    async fn close(&mut self) -> Result<(), CopyError>;

    /// Whether values arrive as text needing coercion to column types
    fn yields_text(&self) -> bool {
        false
    }
}

/// Rows streamed from one open cursor.
struct Cursor {
    stream: RowStream,
    rows_read: u64,
}

impl Cursor {
    async fn next(&mut self) -> Option<Result<Vec<Value>, CopyError>> {
        let item = self.stream.next().await?;
        self.rows_read += 1;
        Some(item.map(|row| row.into_values()).map_err(|e| CopyError::SourceRead {
            row: self.rows_read,
            message: e.to_string(),
        }))
    }
}

/// Full or filtered scan of one table.
pub struct TableScanSource {
    connection: Arc<dyn Connection>,
    table: TableRef,
    where_clause: Option<String>,
    columns: Option<Vec<ColumnDescriptor>>,
    cursor: Option<Cursor>,
}

impl TableScanSource {
    pub fn new(connection: Arc<dyn Connection>, table: TableRef) -> Self {
        Self {
            connection,
            table,
            where_clause: None,
            columns: None,
            cursor: None,
        }
    }

    /// Restrict the scan with a WHERE fragment (without the keyword).
    pub fn with_filter(mut self, where_clause: impl Into<String>) -> Self {
        let clause = where_clause.into();
        self.where_clause = (!clause.trim().is_empty()).then_some(clause);
        self
    }

    fn from_clause(&self) -> String {
        let table = self.table.qualified(|s| self.connection.quote_identifier(s));
        match &self.where_clause {
            Some(clause) => format!("{} WHERE {}", table, clause),
            None => table,
        }
    }

    fn select_sql(&self, columns: &[ColumnDescriptor]) -> String {
        let list = columns
            .iter()
            .map(|c| self.connection.quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {} FROM {}", list, self.from_clause())
    }
}

#[async_trait]
impl RowSource for TableScanSource {
    fn label(&self) -> String {
        match &self.where_clause {
            Some(clause) => format!("table {} where {}", self.table, clause),
            None => format!("table {}", self.table),
        }
    }

    async fn columns(&mut self) -> Result<Vec<ColumnDescriptor>, CopyError> {
        if let Some(columns) = &self.columns {
            return Ok(columns.clone());
        }
        let columns = match self.connection.as_catalog() {
            Some(catalog) => catalog.describe_columns(&self.table).await?,
            None => {
                let select = format!("SELECT * FROM {}", self.from_clause());
                self.connection.describe(&select).await?
            }
        };
        if columns.is_empty() {
            return Err(CopyError::Schema(format!("Source table {} has no columns", self.table)));
        }
        self.columns = Some(columns.clone());
        Ok(columns)
    }

    #[tracing::instrument(skip(self), fields(table = %self.table))]
    async fn open(&mut self) -> Result<(), CopyError> {
        let columns = self.columns().await?;
        let sql = self.select_sql(&columns);
        tracing::debug!(sql = %sql, "opening table scan");
        let stream = self.connection.query_stream(&sql, &[]).await?;
        self.cursor = Some(Cursor {
            stream,
            rows_read: 0,
        });
        Ok(())
    }

    async fn next_row(&mut self) -> Option<Result<Vec<Value>, CopyError>> {
        self.cursor.as_mut()?.next().await
    }

    async fn estimated_size(&mut self) -> SizeEstimate {
        if !self.connection.supports_fast_count() {
            return SizeEstimate::Unknown;
        }
        let sql = format!("SELECT COUNT(*) FROM {}", self.from_clause());
        match self.connection.query(&sql, &[]).await {
            Ok(result) => result
                .rows
                .first()
                .and_then(|row| row.get(0))
                .and_then(Value::as_i64)
                .map(|n| SizeEstimate::Rows(n.max(0) as u64))
                .unwrap_or(SizeEstimate::Unknown),
            Err(e) => {
                tracing::debug!(error = %e, "row count unavailable");
                SizeEstimate::Unknown
            }
        }
    }

    async fn close(&mut self) -> Result<(), CopyError> {
        if let Some(cursor) = self.cursor.take() {
            tracing::debug!(table = %self.table, rows = cursor.rows_read, "closing table scan");
        }
        Ok(())
    }
}

/// Rows of an arbitrary SELECT statement.
pub struct QuerySource {
    connection: Arc<dyn Connection>,
    sql: String,
    columns: Option<Vec<ColumnDescriptor>>,
    cursor: Option<Cursor>,
}

impl QuerySource {
    pub fn new(connection: Arc<dyn Connection>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let sql = sql.trim().trim_end_matches(';').trim_end().to_string();
        Self {
            connection,
            sql,
            columns: None,
            cursor: None,
        }
    }
}

#[async_trait]
impl RowSource for QuerySource {
    fn label(&self) -> String {
        format!("query {}", self.sql.chars().take(60).collect::<String>())
    }

    /// Shape comes from describing the statement, never from running it.
    async fn columns(&mut self) -> Result<Vec<ColumnDescriptor>, CopyError> {
        if let Some(columns) = &self.columns {
            return Ok(columns.clone());
        }
        let columns = self.connection.describe(&self.sql).await?;
        if columns.is_empty() {
            return Err(CopyError::Configuration(
                "Source query returns no columns".to_string(),
            ));
        }
        self.columns = Some(columns.clone());
        Ok(columns)
    }

    async fn open(&mut self) -> Result<(), CopyError> {
        tracing::debug!(sql_preview = %self.sql.chars().take(100).collect::<String>(), "opening query source");
        let stream = self.connection.query_stream(&self.sql, &[]).await?;
        self.cursor = Some(Cursor {
            stream,
            rows_read: 0,
        });
        Ok(())
    }

    async fn next_row(&mut self) -> Option<Result<Vec<Value>, CopyError>> {
        self.cursor.as_mut()?.next().await
    }

    async fn close(&mut self) -> Result<(), CopyError> {
        self.cursor = None;
        Ok(())
    }
}

/// Rows already in memory. Useful for callers producing data themselves.
pub struct VecSource {
    columns: Vec<ColumnDescriptor>,
    rows: std::vec::IntoIter<Vec<Value>>,
    total: u64,
}

impl VecSource {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        let total = rows.len() as u64;
        Self {
            columns,
            rows: rows.into_iter(),
            total,
        }
    }
}

#[async_trait]
impl RowSource for VecSource {
    fn label(&self) -> String {
        format!("{} in-memory rows", self.total)
    }

    async fn columns(&mut self) -> Result<Vec<ColumnDescriptor>, CopyError> {
        Ok(self.columns.clone())
    }

    async fn open(&mut self) -> Result<(), CopyError> {
        Ok(())
    }

    async fn next_row(&mut self) -> Option<Result<Vec<Value>, CopyError>> {
        self.rows.next().map(Ok)
    }

    async fn estimated_size(&mut self) -> SizeEstimate {
        SizeEstimate::Rows(self.total)
    }

    async fn close(&mut self) -> Result<(), CopyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tablecopy_sqlite::SqliteConnection;

    async fn person_db() -> Arc<dyn Connection> {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE person (id INTEGER PRIMARY KEY, first_name TEXT, last_name TEXT)",
            &[],
        )
        .await
        .unwrap();
        conn.execute(
            "INSERT INTO person VALUES (1, 'Ada', 'Lovelace'), (2, 'Alan', 'Turing'), (3, 'Grace', 'Hopper')",
            &[],
        )
        .await
        .unwrap();
        Arc::new(conn)
    }

    async fn drain(source: &mut dyn RowSource) -> Vec<Vec<Value>> {
        let mut rows = Vec::new();
        while let Some(row) = source.next_row().await {
            rows.push(row.unwrap());
        }
        rows
    }

    #[test]
    fn test_size_estimates() {
        assert_eq!(SizeEstimate::Rows(7).estimated_rows(), Some(7));
        assert_eq!(SizeEstimate::Bytes(8_000).estimated_rows(), Some(100));
        assert_eq!(SizeEstimate::Bytes(3).estimated_rows(), Some(1));
        assert_eq!(SizeEstimate::Unknown.estimated_rows(), None);
    }

    #[tokio::test]
    async fn test_table_scan_with_filter() {
        let conn = person_db().await;
        let mut source =
            TableScanSource::new(conn, TableRef::new("person")).with_filter("id >= 2");

        let columns = source.columns().await.unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns[0].is_primary_key);
        assert_eq!(source.estimated_size().await, SizeEstimate::Rows(2));

        source.open().await.unwrap();
        let rows = drain(&mut source).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][2], Value::String("Turing".into()));
        source.close().await.unwrap();
        assert!(source.next_row().await.is_none());
    }

    #[tokio::test]
    async fn test_query_source_describes_before_running() {
        let conn = person_db().await;
        let mut source = QuerySource::new(
            conn,
            "SELECT id, upper(last_name) AS last_name FROM person ORDER BY id;",
        );

        let names: Vec<String> = source
            .columns()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["id", "last_name"]);
        assert_eq!(source.estimated_size().await, SizeEstimate::Unknown);

        source.open().await.unwrap();
        let rows = drain(&mut source).await;
        assert_eq!(rows[2], vec![Value::Int64(3), Value::String("HOPPER".into())]);
    }

    #[tokio::test]
    async fn test_missing_table_is_reported() {
        let conn = person_db().await;
        let mut source = TableScanSource::new(conn, TableRef::new("nobody"));
        assert!(source.columns().await.is_err());
    }
}
