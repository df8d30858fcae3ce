//! Row sink: turns mapped rows into DML against the target
//!
//! The writer owns the target's unit of work. In row mode each row runs its
//! own statement(s) and a commit follows every `every` rows; in batch mode
//! rows are queued and submitted as one driver batch. Failed rows are either
//! returned as rejections (continue-on-error) or end the run.

use std::sync::Arc;

use tablecopy_core::{
    ColumnDescriptor, Connection, CoreError, Savepoint, SavepointSupport, StatementResult,
    TableRef, Transaction, Value,
};

use crate::commit::CommitPolicy;
use crate::dml::{DmlStatements, DmlTemplate};
use crate::error::CopyError;
use crate::mapping::MappingDefinition;
use crate::mode::CopyMode;

/// Decides whether a failed primary statement may fall back to the
/// secondary one in a combined mode.
pub type ConstraintViolationPredicate = Arc<dyn Fn(&CoreError) -> bool + Send + Sync>;

/// SQLSTATE class 23, integrity constraint violation
pub fn is_integrity_violation(error: &CoreError) -> bool {
    error.sql_state().is_some_and(|state| state.starts_with("23"))
}

/// Predicate matching driver-specific vendor codes, for stores that do not
/// report SQLSTATE.
pub fn vendor_codes(codes: Vec<i32>) -> ConstraintViolationPredicate {
    Arc::new(move |error: &CoreError| error.vendor_code().is_some_and(|code| codes.contains(&code)))
}

/// Rows rejected under continue-on-error, in row order
pub type Rejections = Vec<CopyError>;

#[derive(Clone)]
pub struct WriterOptions {
    pub mode: CopyMode,
    pub policy: CommitPolicy,
    pub continue_on_error: bool,
    pub use_savepoints: bool,
    pub is_constraint_violation: ConstraintViolationPredicate,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            mode: CopyMode::default(),
            policy: CommitPolicy::default(),
            continue_on_error: false,
            use_savepoints: false,
            is_constraint_violation: Arc::new(is_integrity_violation),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub inserted: u64,
    pub updated: u64,
    pub unmatched: u64,
    pub rejected: u64,
    pub batches_executed: u64,
    pub commits: u64,
}

/// What a single statement did to one row
enum RowEffect {
    Inserted(u64),
    Updated(u64),
    Unmatched,
}

pub struct DmlWriter {
    connection: Arc<dyn Connection>,
    table: TableRef,
    statements: DmlStatements,
    options: WriterOptions,
    unit: Option<Box<dyn Transaction>>,
    autocommit: bool,
    rows_in_unit: u64,
    pending: Vec<(u64, Vec<Value>)>,
    savepoint_seq: u64,
    stats: WriterStats,
}

impl DmlWriter {
    /// Build the DML templates for one run. No statement is executed yet.
    pub fn prepare(
        connection: Arc<dyn Connection>,
        table: TableRef,
        mapping: &MappingDefinition,
        keys: &[ColumnDescriptor],
        options: WriterOptions,
    ) -> Result<Self, CopyError> {
        if mapping.is_empty() {
            return Err(CopyError::Configuration(
                "No source columns are mapped to the target".to_string(),
            ));
        }
        let statements = DmlStatements::build(connection.as_ref(), &table, mapping, keys, options.mode);
        if let Some(insert) = &statements.insert {
            tracing::debug!(sql = %insert.sql, "prepared insert");
        }
        if let Some(update) = &statements.update {
            tracing::debug!(sql = %update.sql, "prepared update");
        }

        Ok(Self {
            connection,
            table,
            statements,
            options,
            unit: None,
            autocommit: false,
            rows_in_unit: 0,
            pending: Vec::new(),
            savepoint_seq: 0,
            stats: WriterStats::default(),
        })
    }

    pub fn statements(&self) -> &DmlStatements {
        &self.statements
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Write the `ordinal`-th source row, given in mapped target-column order.
    ///
    /// In batch mode the row may only be queued; the rejections of a batch
    /// executed by this call are returned.
    pub async fn write(&mut self, ordinal: u64, row: Vec<Value>) -> Result<Rejections, CopyError> {
        match self.options.policy {
            CommitPolicy::Batch { size, .. } => {
                self.pending.push((ordinal, row));
                if self.pending.len() >= size {
                    self.flush().await
                } else {
                    Ok(Vec::new())
                }
            }
            CommitPolicy::RowCommit { .. } => self.write_row(ordinal, row).await,
        }
    }

    /// Execute the queued batch, if any.
    pub async fn flush(&mut self) -> Result<Rejections, CopyError> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let rejections = self.execute_batch().await?;
        if let CommitPolicy::Batch {
            commit_each_batch: true,
            ..
        } = self.options.policy
        {
            self.commit().await?;
        }
        Ok(rejections)
    }

    /// Flush and commit the open unit of work.
    pub async fn finish(&mut self) -> Result<Rejections, CopyError> {
        let rejections = self.flush().await?;
        self.commit().await?;
        Ok(rejections)
    }

    /// Drop queued rows and roll back the open unit of work.
    pub async fn abort(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(rows = self.pending.len(), "discarding queued batch");
            self.pending.clear();
        }
        if let Some(unit) = self.unit.take() {
            match unit.rollback().await {
                Ok(()) => tracing::info!(table = %self.table, "rolled back uncommitted rows"),
                Err(e) => tracing::error!(table = %self.table, error = %e, "rollback failed"),
            }
        }
        self.rows_in_unit = 0;
    }

    async fn ensure_unit(&mut self) -> Result<(), CopyError> {
        if self.unit.is_some() || self.autocommit {
            return Ok(());
        }
        match self.connection.begin_transaction().await {
            Ok(unit) => {
                self.unit = Some(unit);
                Ok(())
            }
            Err(CoreError::NotSupported(reason)) => {
                tracing::warn!(reason = %reason, "target has no transactions, writing in autocommit mode");
                self.autocommit = true;
                Ok(())
            }
            Err(e) => Err(CopyError::Connection(format!("Cannot begin transaction: {}", e))),
        }
    }

    async fn commit(&mut self) -> Result<(), CopyError> {
        self.rows_in_unit = 0;
        let Some(unit) = self.unit.take() else {
            return Ok(());
        };
        unit.commit()
            .await
            .map_err(|e| CopyError::Connection(format!("Commit failed: {}", e)))?;
        self.stats.commits += 1;
        tracing::debug!(table = %self.table, commits = self.stats.commits, "committed");
        Ok(())
    }

    async fn write_row(&mut self, ordinal: u64, row: Vec<Value>) -> Result<Rejections, CopyError> {
        self.ensure_unit().await?;
        self.savepoint_seq += 1;
        let outcome = self.execute_row(self.savepoint_seq, &row).await;

        let mut rejections = Vec::new();
        match outcome {
            Ok(effect) => self.record(effect),
            Err(e) => {
                let error = CopyError::Write {
                    row: ordinal,
                    message: e.to_string(),
                };
                self.reject(error, &mut rejections)?;
            }
        }

        self.rows_in_unit += 1;
        if self.options.policy.row_commit_due(self.rows_in_unit) {
            self.commit().await?;
        }
        Ok(rejections)
    }

    fn reject(&mut self, error: CopyError, rejections: &mut Rejections) -> Result<(), CopyError> {
        if !self.options.continue_on_error {
            return Err(error);
        }
        tracing::warn!(error = %error, "row rejected");
        self.stats.rejected += 1;
        rejections.push(error);
        Ok(())
    }

    fn record(&mut self, effect: RowEffect) {
        match effect {
            RowEffect::Inserted(n) => self.stats.inserted += n,
            RowEffect::Updated(n) => self.stats.updated += n,
            RowEffect::Unmatched => self.stats.unmatched += 1,
        }
    }

    fn template(&self, insert: bool) -> Result<&DmlTemplate, CoreError> {
        let template = if insert {
            self.statements.insert.as_ref()
        } else {
            self.statements.update.as_ref()
        };
        template.ok_or_else(|| CoreError::Other(format!("no statement prepared for {}", self.options.mode)))
    }

    async fn execute_row(&self, seq: u64, row: &[Value]) -> Result<RowEffect, CoreError> {
        match self.options.mode {
            CopyMode::InsertOnly => self.insert(seq, row).await,
            CopyMode::UpdateOnly => self.update(seq, row).await,
            CopyMode::InsertThenUpdate => match self.insert(seq, row).await {
                Err(e) if (self.options.is_constraint_violation)(&e) => {
                    tracing::trace!(error = %e, "insert conflicted, updating instead");
                    // The conflict was not on the key: nothing to update, the insert error stands
                    match self.update(seq, row).await? {
                        RowEffect::Unmatched => Err(e),
                        effect => Ok(effect),
                    }
                }
                other => other,
            },
            CopyMode::UpdateThenInsert => match self.update(seq, row).await? {
                RowEffect::Unmatched => self.insert(seq, row).await,
                effect => Ok(effect),
            },
        }
    }

    async fn insert(&self, seq: u64, row: &[Value]) -> Result<RowEffect, CoreError> {
        let template = self.template(true)?;
        let result = self.guarded(seq, &template.sql, &template.bind(row)).await?;
        Ok(RowEffect::Inserted(result.affected_rows.max(1)))
    }

    async fn update(&self, seq: u64, row: &[Value]) -> Result<RowEffect, CoreError> {
        let template = self.template(false)?;
        let result = self.guarded(seq, &template.sql, &template.bind(row)).await?;
        Ok(match result.affected_rows {
            0 => RowEffect::Unmatched,
            n => RowEffect::Updated(n),
        })
    }

    fn savepoints(&self) -> Option<&dyn SavepointSupport> {
        self.unit
            .as_ref()
            .and_then(|unit| unit.savepoints())
            .filter(|sp| sp.supports_savepoints())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult, CoreError> {
        match &self.unit {
            Some(unit) => unit.execute(sql, params).await,
            None => self.connection.execute(sql, params).await,
        }
    }

    /// Run one statement, under a savepoint when enabled.
    async fn guarded(&self, seq: u64, sql: &str, params: &[Value]) -> Result<StatementResult, CoreError> {
        let Some(savepoints) = self.savepoints().filter(|_| self.options.use_savepoints) else {
            return self.execute(sql, params).await;
        };

        let savepoint = Savepoint::for_sequence("tablecopy_row", seq);
        savepoints.savepoint(savepoint.name()).await?;
        let result = self.execute(sql, params).await;
        if result.is_err() {
            if let Err(e) = savepoints.rollback_to_savepoint(savepoint.name()).await {
                tracing::error!(savepoint = savepoint.name(), error = %e, "rollback to savepoint failed");
            }
        }
        if let Err(e) = savepoints.release_savepoint(savepoint.name()).await {
            tracing::warn!(savepoint = savepoint.name(), error = %e, "releasing savepoint failed");
        }
        result
    }

    async fn execute_batch(&mut self) -> Result<Rejections, CopyError> {
        self.ensure_unit().await?;
        let pending = std::mem::take(&mut self.pending);
        let mode = self.options.mode;
        let template = self
            .statements
            .primary(mode)
            .cloned()
            .ok_or_else(|| CopyError::Configuration(format!("Mode '{}' cannot run in batches", mode)))?;
        let params: Vec<Vec<Value>> = pending.iter().map(|(_, row)| template.bind(row)).collect();

        let attributed = self.connection.reports_batch_row_results();
        // Without per-row results a failed batch may be partly applied;
        // a savepoint lets it be undone as a whole.
        self.savepoint_seq += 1;
        let guard = match self.savepoints() {
            Some(savepoints) if !attributed => {
                let savepoint = Savepoint::for_sequence("tablecopy_batch", self.savepoint_seq);
                savepoints.savepoint(savepoint.name()).await?;
                Some(savepoint)
            }
            _ => None,
        };

        let outcome = match &self.unit {
            Some(unit) => unit.execute_batch(&template.sql, &params).await,
            None => self.connection.execute_batch(&template.sql, &params).await,
        };
        self.stats.batches_executed += 1;
        tracing::debug!(
            batch = self.stats.batches_executed,
            rows = pending.len(),
            ok = outcome.is_ok(),
            "executed batch"
        );

        if let (Some(savepoint), Some(savepoints)) = (&guard, self.savepoints()) {
            if outcome.is_err() {
                savepoints.rollback_to_savepoint(savepoint.name()).await?;
            }
            savepoints.release_savepoint(savepoint.name()).await?;
        }

        let mut rejections = Vec::new();
        match outcome {
            Ok(result) => match result.row_results.filter(|_| attributed) {
                Some(row_results) => {
                    for ((ordinal, _), row_result) in pending.iter().zip(row_results) {
                        match row_result {
                            Ok(affected) => self.record(batch_effect(mode, affected)),
                            Err(e) => {
                                let error = CopyError::Write {
                                    row: *ordinal,
                                    message: e.to_string(),
                                };
                                self.reject(error, &mut rejections)?;
                            }
                        }
                    }
                }
                None => match mode {
                    CopyMode::UpdateOnly => self.stats.updated += result.affected_rows,
                    _ => self.stats.inserted += result.affected_rows,
                },
            },
            Err(e) => {
                if guard.is_none() && !attributed {
                    tracing::warn!("batch failed without a savepoint; earlier rows of the batch may be applied");
                }
                let size = pending.len();
                for (ordinal, _) in &pending {
                    let error = CopyError::Write {
                        row: *ordinal,
                        message: format!("batch of {} rows failed: {}", size, e),
                    };
                    self.reject(error, &mut rejections)?;
                }
            }
        }
        Ok(rejections)
    }
}

fn batch_effect(mode: CopyMode, affected: u64) -> RowEffect {
    match (mode, affected) {
        (CopyMode::UpdateOnly, 0) => RowEffect::Unmatched,
        (CopyMode::UpdateOnly, n) => RowEffect::Updated(n),
        (_, n) => RowEffect::Inserted(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tablecopy_core::{BatchResult, QueryResult, Result};

    /// Shared log of everything the mock target saw
    #[derive(Default)]
    struct Log {
        statements: Vec<String>,
        batches: usize,
    }

    /// Target whose statements fail when the first parameter is in
    /// `conflicts`, with a constraint-violation SQLSTATE.
    struct MockTarget {
        log: Arc<Mutex<Log>>,
        conflicts: Vec<i64>,
        existing: Vec<i64>,
        batch_support: bool,
        attributed: bool,
        savepoints: bool,
        fail_release: bool,
    }

    impl MockTarget {
        fn new() -> Self {
            Self {
                log: Arc::new(Mutex::new(Log::default())),
                conflicts: Vec::new(),
                existing: Vec::new(),
                batch_support: true,
                attributed: true,
                savepoints: false,
                fail_release: false,
            }
        }

        fn run(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
            run_mock(&self.log, &self.conflicts, &self.existing, sql, params)
        }
    }

    fn key_of(sql: &str, params: &[Value]) -> Option<i64> {
        if sql.starts_with("UPDATE") {
            params.last().and_then(Value::as_i64)
        } else {
            params.first().and_then(Value::as_i64)
        }
    }

    fn run_mock(
        log: &Mutex<Log>,
        conflicts: &[i64],
        existing: &[i64],
        sql: &str,
        params: &[Value],
    ) -> Result<StatementResult> {
        log.lock().unwrap().statements.push(sql.to_string());
        let key = key_of(sql, params).unwrap_or_default();
        if sql.starts_with("INSERT") && conflicts.contains(&key) {
            return Err(CoreError::Database {
                message: format!("duplicate key {}", key),
                sql_state: Some("23505".into()),
                vendor_code: None,
            });
        }
        if sql.starts_with("UPDATE") && !existing.contains(&key) {
            return Ok(StatementResult { affected_rows: 0 });
        }
        Ok(StatementResult { affected_rows: 1 })
    }

    struct MockTransaction {
        log: Arc<Mutex<Log>>,
        conflicts: Vec<i64>,
        existing: Vec<i64>,
        attributed: bool,
        savepoints: bool,
        fail_release: bool,
    }

    #[async_trait]
    impl SavepointSupport for MockTransaction {
        async fn savepoint(&self, name: &str) -> Result<Savepoint> {
            self.log.lock().unwrap().statements.push(format!("SAVEPOINT {}", name));
            Ok(Savepoint::new(name))
        }

        async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
            self.log.lock().unwrap().statements.push(format!("ROLLBACK TO {}", name));
            Ok(())
        }

        async fn release_savepoint(&self, name: &str) -> Result<()> {
            self.log.lock().unwrap().statements.push(format!("RELEASE {}", name));
            if self.fail_release {
                return Err(CoreError::database("cannot release"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Transaction for MockTransaction {
        async fn commit(self: Box<Self>) -> Result<()> {
            self.log.lock().unwrap().statements.push("COMMIT".into());
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.log.lock().unwrap().statements.push("ROLLBACK".into());
            Ok(())
        }

        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            Ok(QueryResult::empty())
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
            run_mock(&self.log, &self.conflicts, &self.existing, sql, params)
        }

        async fn execute_batch(&self, sql: &str, rows: &[Vec<Value>]) -> Result<BatchResult> {
            self.log.lock().unwrap().batches += 1;
            if !self.attributed {
                let mut affected_rows = 0;
                for params in rows {
                    affected_rows +=
                        run_mock(&self.log, &self.conflicts, &self.existing, sql, params)?.affected_rows;
                }
                return Ok(BatchResult {
                    affected_rows,
                    row_results: None,
                });
            }
            let row_results: Vec<Result<u64>> = rows
                .iter()
                .map(|params| {
                    run_mock(&self.log, &self.conflicts, &self.existing, sql, params)
                        .map(|r| r.affected_rows)
                })
                .collect();
            let affected_rows = row_results.iter().filter_map(|r| r.as_ref().ok()).sum();
            Ok(BatchResult {
                affected_rows,
                row_results: Some(row_results),
            })
        }

        fn savepoints(&self) -> Option<&dyn SavepointSupport> {
            if self.savepoints { Some(self) } else { None }
        }
    }

    #[async_trait]
    impl Connection for MockTarget {
        fn driver_name(&self) -> &str {
            "mock"
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
            self.run(sql, params)
        }

        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            Ok(QueryResult::empty())
        }

        fn supports_batch_updates(&self) -> bool {
            self.batch_support
        }

        fn reports_batch_row_results(&self) -> bool {
            self.attributed
        }

        async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
            self.log.lock().unwrap().statements.push("BEGIN".into());
            Ok(Box::new(MockTransaction {
                log: self.log.clone(),
                conflicts: self.conflicts.clone(),
                existing: self.existing.clone(),
                attributed: self.attributed,
                savepoints: self.savepoints,
                fail_release: self.fail_release,
            }))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    fn mapping() -> (MappingDefinition, Vec<ColumnDescriptor>) {
        let cols = vec![
            ColumnDescriptor::new("id", "INTEGER").with_primary_key(true),
            ColumnDescriptor::new("name", "TEXT"),
        ];
        let keys = vec![cols[0].clone()];
        (
            MappingDefinition {
                source_columns: cols.clone(),
                target_columns: cols,
                has_skipped_columns: false,
            },
            keys,
        )
    }

    fn row(id: i64) -> Vec<Value> {
        vec![Value::Int64(id), Value::String(format!("name{}", id))]
    }

    fn writer(target: MockTarget, options: WriterOptions) -> (Arc<Mutex<Log>>, DmlWriter) {
        let log = target.log.clone();
        let (def, keys) = mapping();
        let writer = DmlWriter::prepare(Arc::new(target), TableRef::new("t"), &def, &keys, options).unwrap();
        (log, writer)
    }

    async fn write_all(writer: &mut DmlWriter, ids: impl IntoIterator<Item = i64>) -> std::result::Result<Rejections, CopyError> {
        let mut rejections = Vec::new();
        for (i, id) in ids.into_iter().enumerate() {
            rejections.extend(writer.write(i as u64 + 1, row(id)).await?);
        }
        rejections.extend(writer.finish().await?);
        Ok(rejections)
    }

    #[tokio::test]
    async fn test_batches_issue_ceil_n_over_b_executions() {
        let (log, mut w) = writer(
            MockTarget::new(),
            WriterOptions {
                policy: CommitPolicy::Batch {
                    size: 3,
                    commit_each_batch: false,
                },
                ..Default::default()
            },
        );
        let rejections = write_all(&mut w, 1..=10).await.unwrap();

        assert!(rejections.is_empty());
        assert_eq!(log.lock().unwrap().batches, 4);
        assert_eq!(w.stats().batches_executed, 4);
        assert_eq!(w.stats().inserted, 10);
        assert_eq!(w.stats().commits, 1);
    }

    #[tokio::test]
    async fn test_commit_each_batch() {
        let (_log, mut w) = writer(
            MockTarget::new(),
            WriterOptions {
                policy: CommitPolicy::Batch {
                    size: 2,
                    commit_each_batch: true,
                },
                ..Default::default()
            },
        );
        write_all(&mut w, 1..=5).await.unwrap();
        assert_eq!(w.stats().commits, 3);
    }

    #[tokio::test]
    async fn test_row_commit_every_n() {
        let (log, mut w) = writer(
            MockTarget::new(),
            WriterOptions {
                policy: CommitPolicy::RowCommit { every: 2 },
                ..Default::default()
            },
        );
        write_all(&mut w, 1..=5).await.unwrap();
        let commits = log
            .lock()
            .unwrap()
            .statements
            .iter()
            .filter(|s| *s == "COMMIT")
            .count();
        assert_eq!(commits, 3);
        assert_eq!(w.stats().inserted, 5);
    }

    #[tokio::test]
    async fn test_continue_on_error_rejects_conflicting_rows() {
        let mut target = MockTarget::new();
        target.conflicts = vec![2, 4];
        let (_log, mut w) = writer(
            target,
            WriterOptions {
                continue_on_error: true,
                ..Default::default()
            },
        );
        let rejections = write_all(&mut w, 1..=5).await.unwrap();

        let rows: Vec<u64> = rejections
            .iter()
            .map(|e| match e {
                CopyError::Write { row, .. } => *row,
                other => panic!("unexpected {other}"),
            })
            .collect();
        assert_eq!(rows, vec![2, 4]);
        assert_eq!(w.stats().inserted, 3);
        assert_eq!(w.stats().rejected, 2);
    }

    #[tokio::test]
    async fn test_attributed_batch_failures_are_per_row() {
        let mut target = MockTarget::new();
        target.conflicts = vec![3];
        let (_log, mut w) = writer(
            target,
            WriterOptions {
                policy: CommitPolicy::Batch {
                    size: 4,
                    commit_each_batch: false,
                },
                continue_on_error: true,
                ..Default::default()
            },
        );
        let rejections = write_all(&mut w, 1..=6).await.unwrap();
        assert_eq!(rejections.len(), 1);
        assert_eq!(w.stats().inserted, 5);
    }

    #[tokio::test]
    async fn test_unattributed_batch_failure_rejects_whole_batch() {
        let mut target = MockTarget::new();
        target.conflicts = vec![3];
        target.attributed = false;
        let (_log, mut w) = writer(
            target,
            WriterOptions {
                policy: CommitPolicy::Batch {
                    size: 4,
                    commit_each_batch: false,
                },
                continue_on_error: true,
                ..Default::default()
            },
        );
        let rejections = write_all(&mut w, 1..=6).await.unwrap();
        assert_eq!(w.stats().batches_executed, 2);
        let rows: Vec<u64> = rejections
            .iter()
            .filter_map(|e| match e {
                CopyError::Write { row, .. } => Some(*row),
                _ => None,
            })
            .collect();
        assert_eq!(rows, vec![1, 2, 3, 4]);
        assert_eq!(w.stats().inserted, 2);
    }

    #[tokio::test]
    async fn test_abort_on_first_failure_rolls_back() {
        let mut target = MockTarget::new();
        target.conflicts = vec![2];
        let (log, mut w) = writer(target, WriterOptions::default());

        w.write(1, row(1)).await.unwrap();
        let err = w.write(2, row(2)).await.unwrap_err();
        assert!(matches!(err, CopyError::Write { row: 2, .. }));
        w.abort().await;

        let statements = log.lock().unwrap().statements.clone();
        assert_eq!(statements.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!statements.contains(&"COMMIT".to_string()));
    }

    #[tokio::test]
    async fn test_insert_then_update_falls_back_on_constraint_violation() {
        let mut target = MockTarget::new();
        target.conflicts = vec![1];
        target.existing = vec![1];
        let (log, mut w) = writer(
            target,
            WriterOptions {
                mode: CopyMode::InsertThenUpdate,
                ..Default::default()
            },
        );
        write_all(&mut w, [1, 2]).await.unwrap();

        assert_eq!(w.stats().inserted, 1);
        assert_eq!(w.stats().updated, 1);
        let statements = log.lock().unwrap().statements.clone();
        assert_eq!(
            statements.iter().filter(|s| s.starts_with("UPDATE")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_fallback_needs_matching_predicate() {
        let mut target = MockTarget::new();
        target.conflicts = vec![1];
        target.existing = vec![1];
        let (_log, mut w) = writer(
            target,
            WriterOptions {
                mode: CopyMode::InsertThenUpdate,
                is_constraint_violation: vendor_codes(vec![1062]),
                ..Default::default()
            },
        );
        assert!(w.write(1, row(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_update_then_insert() {
        let mut target = MockTarget::new();
        target.existing = vec![1];
        let (_log, mut w) = writer(
            target,
            WriterOptions {
                mode: CopyMode::UpdateThenInsert,
                ..Default::default()
            },
        );
        write_all(&mut w, [1, 2, 3]).await.unwrap();
        assert_eq!(w.stats().updated, 1);
        assert_eq!(w.stats().inserted, 2);
    }

    #[tokio::test]
    async fn test_update_only_counts_unmatched_rows() {
        let mut target = MockTarget::new();
        target.existing = vec![2];
        let (_log, mut w) = writer(
            target,
            WriterOptions {
                mode: CopyMode::UpdateOnly,
                ..Default::default()
            },
        );
        write_all(&mut w, [1, 2]).await.unwrap();
        assert_eq!(w.stats().updated, 1);
        assert_eq!(w.stats().unmatched, 1);
    }

    #[tokio::test]
    async fn test_insert_then_update_rejects_conflict_without_matching_key() {
        // the insert conflicts on some other unique column, so the keyed update finds nothing
        let mut target = MockTarget::new();
        target.conflicts = vec![2];
        let (_log, mut w) = writer(
            target,
            WriterOptions {
                mode: CopyMode::InsertThenUpdate,
                continue_on_error: true,
                ..Default::default()
            },
        );
        let rejections = write_all(&mut w, [1, 2, 3]).await.unwrap();

        assert_eq!(rejections.len(), 1);
        assert!(matches!(&rejections[0], CopyError::Write { row: 2, message } if message.contains("duplicate key 2")));
        assert_eq!(w.stats().inserted, 2);
        assert_eq!(w.stats().updated, 0);
        assert_eq!(w.stats().unmatched, 0);
        assert_eq!(w.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_insert_then_update_conflict_without_matching_key_aborts() {
        let mut target = MockTarget::new();
        target.conflicts = vec![2];
        let (_log, mut w) = writer(
            target,
            WriterOptions {
                mode: CopyMode::InsertThenUpdate,
                ..Default::default()
            },
        );
        w.write(1, row(1)).await.unwrap();
        let err = w.write(2, row(2)).await.unwrap_err();
        assert!(matches!(err, CopyError::Write { row: 2, .. }));
    }

    #[tokio::test]
    async fn test_savepoint_guards_each_row() {
        let mut target = MockTarget::new();
        target.conflicts = vec![2];
        target.savepoints = true;
        let (log, mut w) = writer(
            target,
            WriterOptions {
                continue_on_error: true,
                use_savepoints: true,
                ..Default::default()
            },
        );
        let rejections = write_all(&mut w, [1, 2]).await.unwrap();
        assert_eq!(rejections.len(), 1);

        let statements = log.lock().unwrap().statements.clone();
        let insert = r#"INSERT INTO "t" ("id", "name") VALUES (?, ?)"#;
        assert_eq!(
            statements,
            vec![
                "BEGIN",
                "SAVEPOINT tablecopy_row_1",
                insert,
                "RELEASE tablecopy_row_1",
                "SAVEPOINT tablecopy_row_2",
                insert,
                "ROLLBACK TO tablecopy_row_2",
                "RELEASE tablecopy_row_2",
                "COMMIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_savepoints_unused_when_disabled() {
        let mut target = MockTarget::new();
        target.savepoints = true;
        let (log, mut w) = writer(target, WriterOptions::default());
        write_all(&mut w, [1]).await.unwrap();
        let statements = log.lock().unwrap().statements.clone();
        assert!(!statements.iter().any(|s| s.starts_with("SAVEPOINT")));
    }

    #[tokio::test]
    async fn test_failed_release_keeps_applied_row() {
        let mut target = MockTarget::new();
        target.savepoints = true;
        target.fail_release = true;
        let (_log, mut w) = writer(
            target,
            WriterOptions {
                use_savepoints: true,
                ..Default::default()
            },
        );
        let rejections = write_all(&mut w, [1, 2]).await.unwrap();
        assert!(rejections.is_empty());
        assert_eq!(w.stats().inserted, 2);
        assert_eq!(w.stats().rejected, 0);
    }

    #[tokio::test]
    async fn test_unattributed_batch_runs_under_savepoint() {
        let mut target = MockTarget::new();
        target.conflicts = vec![3];
        target.attributed = false;
        target.savepoints = true;
        let (log, mut w) = writer(
            target,
            WriterOptions {
                policy: CommitPolicy::Batch {
                    size: 4,
                    commit_each_batch: false,
                },
                continue_on_error: true,
                ..Default::default()
            },
        );
        let rejections = write_all(&mut w, 1..=6).await.unwrap();
        assert_eq!(rejections.len(), 4);
        assert_eq!(w.stats().inserted, 2);

        let statements = log.lock().unwrap().statements.clone();
        let markers: Vec<&str> = statements
            .iter()
            .map(String::as_str)
            .filter(|s| !s.starts_with("INSERT"))
            .collect();
        assert_eq!(
            markers,
            vec![
                "BEGIN",
                "SAVEPOINT tablecopy_batch_1",
                "ROLLBACK TO tablecopy_batch_1",
                "RELEASE tablecopy_batch_1",
                "SAVEPOINT tablecopy_batch_2",
                "RELEASE tablecopy_batch_2",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_integrity_violation_predicate() {
        let violation = CoreError::Database {
            message: "dup".into(),
            sql_state: Some("23000".into()),
            vendor_code: Some(1555),
        };
        assert!(is_integrity_violation(&violation));
        assert!(!is_integrity_violation(&CoreError::database("locked")));
        assert!(vendor_codes(vec![1555])(&violation));
    }
}
