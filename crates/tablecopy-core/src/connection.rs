//! Connection trait and transaction handling

use crate::{
    BatchResult, ColumnCatalog, ColumnDescriptor, QueryResult, Result, Row, SavepointSupport,
    SchemaMutation, StatementResult, Value,
};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

/// Lazily produced rows. Dropping the stream releases the underlying cursor.
pub type RowStream = BoxStream<'static, Result<Row>>;

/// A database connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite", "postgresql", "mysql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE/DDL)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query and materialize all rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a query and yield rows one at a time.
    ///
    /// The default implementation materializes the result first. Drivers
    /// with a real cursor should override it.
    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<RowStream> {
        let result = self.query(sql, params).await?;
        Ok(stream::iter(result.rows.into_iter().map(Ok)).boxed())
    }

    /// Describe the columns a statement would return without reading its rows.
    ///
    /// The default wraps the statement in a zero-row query.
    async fn describe(&self, sql: &str) -> Result<Vec<ColumnDescriptor>> {
        let shape = format!("SELECT * FROM ({}) tablecopy_shape WHERE 1 = 0", sql);
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "describing statement with zero-row query");
        Ok(self.query(&shape, &[]).await?.columns)
    }

    /// Execute one statement once per parameter set.
    ///
    /// The default stops at the first failing parameter set and returns its
    /// error, which means the failure is not attributed to a row.
    async fn execute_batch(&self, sql: &str, rows: &[Vec<Value>]) -> Result<BatchResult> {
        let mut affected_rows = 0;
        for params in rows {
            affected_rows += self.execute(sql, params).await?.affected_rows;
        }
        Ok(BatchResult {
            affected_rows,
            row_results: None,
        })
    }

    /// Whether the driver executes parameter batches natively
    fn supports_batch_updates(&self) -> bool {
        false
    }

    /// Whether `execute_batch` reports an outcome per parameter set
    fn reports_batch_row_results(&self) -> bool {
        false
    }

    /// Whether `SELECT COUNT(*)` on a whole table is cheap on this store
    fn supports_fast_count(&self) -> bool {
        false
    }

    /// Quote an identifier for use in generated SQL
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Bind placeholder for the parameter at `index` (1-based)
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get the column catalog if supported
    fn as_catalog(&self) -> Option<&dyn ColumnCatalog> {
        None
    }

    /// Get schema mutation support if available
    fn as_schema_mutation(&self) -> Option<&dyn SchemaMutation> {
        None
    }
}

/// A database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Execute a query within the transaction
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement within the transaction
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute one statement once per parameter set within the transaction.
    ///
    /// Same contract as [`Connection::execute_batch`].
    async fn execute_batch(&self, sql: &str, rows: &[Vec<Value>]) -> Result<BatchResult> {
        let mut affected_rows = 0;
        for params in rows {
            affected_rows += self.execute(sql, params).await?.affected_rows;
        }
        Ok(BatchResult {
            affected_rows,
            row_results: None,
        })
    }

    /// Savepoint support, if this transaction offers it
    fn savepoints(&self) -> Option<&dyn SavepointSupport> {
        None
    }
}
