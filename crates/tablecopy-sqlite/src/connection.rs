//! SQLite connection implementation

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params_from_iter};
use std::sync::Arc;
use tablecopy_core::{
    BatchResult, ColumnCatalog, ColumnDescriptor, Connection, CoreError, QueryResult, Result, Row,
    RowStream, Savepoint, SavepointSupport, SchemaMutation, StatementResult, Transaction, Value,
};
use tokio::sync::{mpsc, oneshot};

use crate::convert::{
    map_sqlite_error, row_values, run_batch, run_execute, run_query, statement_columns,
    values_to_rusqlite,
};

/// Rows buffered between the cursor thread and the consumer
const STREAM_BUFFER: usize = 256;

/// SQLite connection wrapper
pub struct SqliteConnection {
    pub(crate) conn: Arc<Mutex<RusqliteConnection>>,
    /// Database file for dedicated cursor connections; `None` for in-memory databases
    path: Option<String>,
}

impl SqliteConnection {
    /// Open a SQLite database
    pub fn open(path: &str) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let (conn, stream_path) = if path == ":memory:" {
            let conn = RusqliteConnection::open_in_memory().map_err(|e| {
                CoreError::Connection(format!("Failed to open in-memory database: {}", e))
            })?;
            (conn, None)
        } else {
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent()
                    && !parent.exists()
                {
                    return Err(CoreError::Connection(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            let conn = RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                CoreError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?;
            // URIs may name shared or in-memory databases a second handle cannot see
            let stream_path = (!expanded_path.starts_with("file:")).then(|| expanded_path.clone());
            (conn, stream_path)
        };

        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| CoreError::Connection(format!("Failed to enable foreign keys: {}", e)))?;

        // WAL lets cursor connections read while this one writes
        if stream_path.is_some() {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| CoreError::Connection(format!("Failed to set journal mode: {}", e)))?;
        }

        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| CoreError::Connection(format!("Failed to set synchronous mode: {}", e)))?;

        tracing::info!(path = %expanded_path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: stream_path,
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Expand path to handle ~ (home directory) and relative paths
    fn expand_path(path: &str) -> Result<String> {
        if path == ":memory:" || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            match std::env::var_os("HOME") {
                Some(home) => std::path::PathBuf::from(home)
                    .join(rest)
                    .to_string_lossy()
                    .to_string(),
                None => {
                    return Err(CoreError::Configuration(
                        "Unable to determine HOME directory".into(),
                    ));
                }
            }
        } else if path.starts_with('~') {
            return Err(CoreError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        let result = if path_buf.is_relative() {
            std::env::current_dir()
                .map_err(CoreError::Io)?
                .join(path_buf)
                .to_string_lossy()
                .to_string()
        } else {
            expanded
        };

        Ok(result)
    }

    /// Stream rows from a dedicated read-only connection on a blocking thread.
    ///
    /// The thread holds the cursor until the result is exhausted or the
    /// receiving stream is dropped.
    async fn stream_from_file(&self, path: String, sql: &str, params: &[Value]) -> Result<RowStream> {
        let sql = sql.to_string();
        let params = values_to_rusqlite(params);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (row_tx, row_rx) = mpsc::channel::<Result<Row>>(STREAM_BUFFER);

        tokio::task::spawn_blocking(move || {
            let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            let conn = match RusqliteConnection::open_with_flags(&path, flags) {
                Ok(conn) => conn,
                Err(e) => {
                    let _ = ready_tx.send(Err(CoreError::Connection(format!(
                        "Failed to open cursor connection: {}",
                        e
                    ))));
                    return;
                }
            };
            let mut stmt = match conn.prepare(&sql) {
                Ok(stmt) => stmt,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_sqlite_error("Failed to prepare query", e)));
                    return;
                }
            };
            let names: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = match stmt.query(params_from_iter(params.iter())) {
                Ok(rows) => rows,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_sqlite_error("Failed to execute query", e)));
                    return;
                }
            };
            if ready_tx.send(Ok(())).is_err() {
                return;
            }

            let mut streamed = 0u64;
            loop {
                let item = match rows.next() {
                    Ok(Some(row)) => {
                        row_values(row, names.len()).map(|values| Row::new(names.clone(), values))
                    }
                    Ok(None) => break,
                    Err(e) => Err(map_sqlite_error("Failed to fetch row", e)),
                };
                let failed = item.is_err();
                if row_tx.blocking_send(item).is_err() {
                    tracing::debug!(rows = streamed, "row stream dropped by consumer");
                    return;
                }
                if failed {
                    return;
                }
                streamed += 1;
            }
            tracing::debug!(rows = streamed, "row stream exhausted");
        });

        ready_rx
            .await
            .map_err(|_| CoreError::Connection("Cursor thread exited before opening".into()))??;

        Ok(stream::unfold(row_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let conn = self.conn.lock();
        run_execute(&conn, sql, params)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn.lock();
        run_query(&conn, sql, params)
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<RowStream> {
        match &self.path {
            Some(path) => self.stream_from_file(path.clone(), sql, params).await,
            None => {
                // A second handle cannot see a private in-memory database
                let result = self.query(sql, params).await?;
                Ok(stream::iter(result.rows.into_iter().map(Ok)).boxed())
            }
        }
    }

    async fn describe(&self, sql: &str) -> Result<Vec<ColumnDescriptor>> {
        let conn = self.conn.lock();
        let stmt = conn
            .prepare(sql)
            .map_err(|e| map_sqlite_error("Failed to describe statement", e))?;
        Ok(statement_columns(&stmt))
    }

    #[tracing::instrument(skip(self, sql, rows), fields(rows = rows.len()))]
    async fn execute_batch(&self, sql: &str, rows: &[Vec<Value>]) -> Result<BatchResult> {
        let conn = self.conn.lock();
        run_batch(&conn, sql, rows)
    }

    fn supports_batch_updates(&self) -> bool {
        true
    }

    fn reports_batch_row_results(&self) -> bool {
        true
    }

    fn supports_fast_count(&self) -> bool {
        true
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        tracing::debug!("beginning SQLite transaction");
        {
            let conn = self.conn.lock();
            conn.execute_batch("BEGIN DEFERRED")
                .map_err(|e| map_sqlite_error("Failed to begin transaction", e))?;
        }
        Ok(Box::new(SqliteTransaction {
            conn: Arc::clone(&self.conn),
            committed: false,
            rolled_back: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("closing SQLite connection");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn as_catalog(&self) -> Option<&dyn ColumnCatalog> {
        Some(self)
    }

    fn as_schema_mutation(&self) -> Option<&dyn SchemaMutation> {
        Some(self)
    }
}

/// SQLite transaction wrapper.
///
/// Issues raw `BEGIN DEFERRED` / `COMMIT` / `ROLLBACK` SQL so that it can share
/// the connection mutex without rusqlite's borrow-based transaction lifetimes.
pub struct SqliteTransaction {
    conn: Arc<Mutex<RusqliteConnection>>,
    committed: bool,
    rolled_back: bool,
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.committed && !self.rolled_back {
            tracing::warn!("SQLite transaction dropped without commit or rollback, issuing automatic rollback");
            let conn = self.conn.lock();
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "automatic rollback on drop failed");
            }
        }
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("committing SQLite transaction");
        if self.rolled_back {
            return Err(CoreError::Query("Transaction already rolled back".into()));
        }
        if self.committed {
            return Err(CoreError::Query("Transaction already committed".into()));
        }

        {
            let conn = self.conn.lock();
            conn.execute_batch("COMMIT")
                .map_err(|e| map_sqlite_error("Failed to commit transaction", e))?;
        }
        self.committed = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("rolling back SQLite transaction");
        if self.committed {
            return Err(CoreError::Query("Transaction already committed".into()));
        }
        if self.rolled_back {
            return Ok(());
        }

        {
            let conn = self.conn.lock();
            conn.execute_batch("ROLLBACK")
                .map_err(|e| map_sqlite_error("Failed to rollback transaction", e))?;
        }
        self.rolled_back = true;
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn.lock();
        run_query(&conn, sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let conn = self.conn.lock();
        run_execute(&conn, sql, params)
    }

    async fn execute_batch(&self, sql: &str, rows: &[Vec<Value>]) -> Result<BatchResult> {
        let conn = self.conn.lock();
        run_batch(&conn, sql, rows)
    }

    fn savepoints(&self) -> Option<&dyn SavepointSupport> {
        Some(self)
    }
}

#[async_trait]
impl SavepointSupport for SqliteTransaction {
    async fn savepoint(&self, name: &str) -> Result<Savepoint> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!("SAVEPOINT {}", name))
            .map_err(|e| map_sqlite_error("Failed to create savepoint", e))?;
        Ok(Savepoint::new(name))
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .map_err(|e| map_sqlite_error("Failed to roll back to savepoint", e))
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))
            .map_err(|e| map_sqlite_error("Failed to release savepoint", e))
    }
}
