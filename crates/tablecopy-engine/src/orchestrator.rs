//! Copy orchestration
//!
//! A [`Copier`] runs one [`CopyJob`] through `Idle → Configuring → Running`
//! and ends in `Completed`, `Failed` or `Cancelled`. Everything that can be
//! checked without moving data (mapping, mode and key validation, commit
//! policy) is checked while `Configuring`, before the target is touched.

use std::fmt;
use std::sync::Arc;

use tablecopy_core::{ColumnDescriptor, Connection, TableRef, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coerce::coerce_text;
use crate::commit::CommitPolicy;
use crate::dml::DmlStatements;
use crate::error::CopyError;
use crate::file_source::FileSource;
use crate::job::{CopyJob, CopyOptions, CopySource};
use crate::mapping::{ColumnMapping, MappingDefinition, identity_mapping, resolve_mapping};
use crate::mode::{KeySelection, derive_keys};
use crate::progress::{
    CopyProgress, CopyProgressCallback, ProgressReporter, report_interval, spawn_callback,
};
use crate::result::{CopyResult, CopyStatus};
use crate::sink::{ConstraintViolationPredicate, DmlWriter, Rejections, WriterOptions, is_integrity_violation};
use crate::source::{QuerySource, RowSource, TableScanSource};

/// Lifecycle of one copy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    Idle,
    Configuring,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl CopyState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CopyState::Completed | CopyState::Failed | CopyState::Cancelled
        )
    }
}

impl From<CopyStatus> for CopyState {
    fn from(status: CopyStatus) -> Self {
        match status {
            CopyStatus::Completed => CopyState::Completed,
            CopyStatus::Failed => CopyState::Failed,
            CopyStatus::Cancelled => CopyState::Cancelled,
        }
    }
}

impl fmt::Display for CopyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CopyState::Idle => "idle",
            CopyState::Configuring => "configuring",
            CopyState::Running => "running",
            CopyState::Completed => "completed",
            CopyState::Failed => "failed",
            CopyState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What a job would do, without doing it.
#[derive(Debug, Clone)]
pub struct CopyPreview {
    pub source_columns: Vec<ColumnDescriptor>,
    /// `(source, target)` column names in write order
    pub pairs: Vec<(String, String)>,
    /// Target columns left to their defaults
    pub unfilled_targets: Vec<String>,
    pub key_columns: Vec<String>,
    pub target_exists: bool,
    pub creates_target: bool,
    pub commit_policy: CommitPolicy,
    pub warnings: Vec<String>,
    pub insert_sql: Option<String>,
    pub update_sql: Option<String>,
}

/// Everything settled while configuring.
struct CopyPlan {
    mapping: ColumnMapping,
    definition: MappingDefinition,
    keys: Vec<ColumnDescriptor>,
    /// Index of each mapped column in the rows the source produces
    positions: Vec<usize>,
    policy: CommitPolicy,
    warnings: Vec<String>,
    target_exists: bool,
    creates_target: bool,
}

/// Runs copy jobs from a source connection into a target connection.
#[derive(Clone)]
pub struct Copier {
    source: Arc<dyn Connection>,
    target: Arc<dyn Connection>,
    cancel: CancellationToken,
    progress_callback: Option<CopyProgressCallback>,
    is_constraint_violation: ConstraintViolationPredicate,
}

impl Copier {
    /// Copier reading from and writing to the same connection.
    pub fn new(target: Arc<dyn Connection>) -> Self {
        Self {
            source: target.clone(),
            target,
            cancel: CancellationToken::new(),
            progress_callback: None,
            is_constraint_violation: Arc::new(is_integrity_violation),
        }
    }

    pub fn with_source_connection(mut self, source: Arc<dyn Connection>) -> Self {
        self.source = source;
        self
    }

    /// Cancelling `token` cancels every job started by this copier.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress_callback(mut self, callback: CopyProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Decides when a combined mode falls back to its secondary statement.
    pub fn with_constraint_violation(mut self, predicate: ConstraintViolationPredicate) -> Self {
        self.is_constraint_violation = predicate;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `job` on a dedicated task.
    pub fn start(&self, job: CopyJob) -> CopyHandle {
        let cancel = self.cancel.child_token();
        let (state_tx, state_rx) = watch::channel(CopyState::Idle);
        let (progress_tx, progress_rx) = watch::channel(CopyProgress::default());
        let forward = self
            .progress_callback
            .clone()
            .map(|callback| spawn_callback(progress_rx.clone(), callback));

        let copier = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let result = copier.execute(job, token, state_tx, progress_tx).await;
            if let Some(forward) = forward {
                let _ = forward.await;
            }
            result
        });

        CopyHandle {
            cancel,
            state: state_rx,
            progress: progress_rx,
            join,
        }
    }

    /// Run `job` on the current task.
    ///
    /// `Err` means the run never reached `Running`; once rows move, the
    /// outcome is in [`CopyResult::status`].
    pub async fn run(&self, job: CopyJob) -> Result<CopyResult, CopyError> {
        let (state_tx, _state_rx) = watch::channel(CopyState::Idle);
        let (progress_tx, progress_rx) = watch::channel(CopyProgress::default());
        let forward = self
            .progress_callback
            .clone()
            .map(|callback| spawn_callback(progress_rx, callback));

        let result = self
            .execute(job, self.cancel.child_token(), state_tx, progress_tx)
            .await;
        if let Some(forward) = forward {
            let _ = forward.await;
        }
        result
    }

    /// Resolve mapping, keys and commit policy for `job` without touching
    /// the target.
    pub async fn preview(&self, job: CopyJob) -> Result<CopyPreview, CopyError> {
        job.validate()?;
        let CopyJob {
            source,
            target,
            options,
        } = job;
        let mut source = self.build_source(source);
        let configured = self.configure(&target, &options, source.as_mut()).await;
        let source_columns = source.columns().await;
        close_source(source.as_mut()).await;
        let plan = configured?;

        let statements = DmlStatements::build(
            self.target.as_ref(),
            &target,
            &plan.definition,
            &plan.keys,
            options.mode,
        );
        let pairs = plan
            .definition
            .source_columns
            .iter()
            .zip(&plan.definition.target_columns)
            .map(|(s, t)| (s.name.clone(), t.name.clone()))
            .collect();
        let unfilled_targets = plan
            .mapping
            .entries()
            .iter()
            .filter(|e| !plan.definition.target_columns.iter().any(|t| t.same_name(&e.target)))
            .map(|e| e.target.name.clone())
            .collect();

        Ok(CopyPreview {
            source_columns: source_columns?,
            pairs,
            unfilled_targets,
            key_columns: plan.keys.iter().map(|k| k.name.clone()).collect(),
            target_exists: plan.target_exists,
            creates_target: plan.creates_target,
            commit_policy: plan.policy,
            warnings: plan.warnings,
            insert_sql: statements.insert.map(|t| t.sql),
            update_sql: statements.update.map(|t| t.sql),
        })
    }

    fn build_source(&self, source: CopySource) -> Box<dyn RowSource> {
        match source {
            CopySource::Table { table, where_clause } => {
                let scan = TableScanSource::new(self.source.clone(), table);
                Box::new(match where_clause {
                    Some(clause) => scan.with_filter(clause),
                    None => scan,
                })
            }
            CopySource::Query(sql) => Box::new(QuerySource::new(self.source.clone(), sql)),
            CopySource::File(options) => Box::new(FileSource::new(options)),
            CopySource::Custom(source) => source,
        }
    }

    #[tracing::instrument(skip_all, fields(target = %job.target, mode = %job.options.mode))]
    async fn execute(
        &self,
        job: CopyJob,
        cancel: CancellationToken,
        state: watch::Sender<CopyState>,
        progress: watch::Sender<CopyProgress>,
    ) -> Result<CopyResult, CopyError> {
        state.send_replace(CopyState::Configuring);
        if let Err(e) = job.validate() {
            state.send_replace(CopyState::Failed);
            return Err(e);
        }

        let CopyJob {
            source,
            target,
            options,
        } = job;
        let mut source = self.build_source(source);
        let mut result = CopyResult::new(target.to_string(), options.mode, options.max_warnings);

        let prepared = self
            .prepare_run(&target, &options, source.as_mut(), &mut result)
            .await;
        let (plan, mut writer) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(error = %e, "copy failed before any row moved");
                close_source(source.as_mut()).await;
                state.send_replace(CopyState::Failed);
                return Err(e);
            }
        };

        state.send_replace(CopyState::Running);
        let estimate = source.estimated_size().await;
        let mut reporter = ProgressReporter::new(
            progress,
            report_interval(options.report_interval, estimate),
            estimate,
        );
        tracing::info!(
            source = %source.label(),
            columns = plan.definition.len(),
            policy = %plan.policy,
            report_interval = reporter.interval(),
            "copy running"
        );

        let mut status = self
            .pump(
                source.as_mut(),
                &mut writer,
                &plan,
                &options,
                &cancel,
                &mut reporter,
                &mut result,
            )
            .await;
        close_source(source.as_mut()).await;

        let stats = writer.stats();
        result.inserted = stats.inserted;
        result.updated = stats.updated;
        result.unmatched = stats.unmatched;
        result.rejected += stats.rejected;
        result.batches_executed = stats.batches_executed;
        result.commits = stats.commits;

        if status == CopyStatus::Completed {
            if let Some(sql) = options.post_sql.as_deref().filter(|s| !s.trim().is_empty()) {
                if let Err(e) = self.target.execute(sql, &[]).await {
                    tracing::error!(error = %e, "post-table statement failed");
                    result.errors.push(format!("Post-table statement failed: {}", e));
                    status = CopyStatus::Failed;
                }
            }
        }

        reporter.finish(result.rows_processed);
        result.finish(status);
        state.send_replace(status.into());
        tracing::info!(
            status = %status,
            rows = result.rows_processed,
            inserted = result.inserted,
            updated = result.updated,
            warnings = result.warnings.total(),
            "copy finished"
        );
        Ok(result)
    }

    /// Configure, set up the target, open the source and prepare the writer.
    async fn prepare_run(
        &self,
        target: &TableRef,
        options: &CopyOptions,
        source: &mut dyn RowSource,
        result: &mut CopyResult,
    ) -> Result<(CopyPlan, DmlWriter), CopyError> {
        let plan = self.configure(target, options, source).await?;
        result.commit_policy = plan.policy.to_string();
        for warning in &plan.warnings {
            result.warnings.push(warning.clone());
        }

        self.setup_target(target, options, &plan, result).await?;
        source.open().await?;

        let writer = DmlWriter::prepare(
            self.target.clone(),
            target.clone(),
            &plan.definition,
            &plan.keys,
            WriterOptions {
                mode: options.mode,
                policy: plan.policy,
                continue_on_error: options.continue_on_error,
                use_savepoints: options.use_savepoints,
                is_constraint_violation: self.is_constraint_violation.clone(),
            },
        )?;
        Ok((plan, writer))
    }

    async fn configure(
        &self,
        target: &TableRef,
        options: &CopyOptions,
        source: &mut dyn RowSource,
    ) -> Result<CopyPlan, CopyError> {
        let catalog = self.target.as_catalog().ok_or_else(|| {
            CopyError::Configuration(format!(
                "Target connection ({}) cannot describe tables",
                self.target.driver_name()
            ))
        })?;

        let source_columns = source.columns().await?;
        let target_exists = catalog.table_exists(target).await?;
        let creates_target = options.create_target && (options.drop_target || !target_exists);
        if (creates_target || options.drop_target) && self.target.as_schema_mutation().is_none() {
            return Err(CopyError::Configuration(format!(
                "Target connection ({}) cannot create or drop tables",
                self.target.driver_name()
            )));
        }

        let mut mapping = if creates_target {
            identity_mapping(&source_columns)
        } else if target_exists {
            let target_columns = catalog.describe_columns(target).await?;
            resolve_mapping(&source_columns, &target_columns, options.mapping_options)
        } else {
            return Err(CopyError::Schema(format!(
                "Target table {} does not exist",
                target
            )));
        };
        mapping.apply_overrides(&options.mapping)?;

        let mut definition = mapping.effective_mapping();
        if definition.is_empty() {
            return Err(CopyError::Configuration(format!(
                "No source column matches a column of {}",
                target
            )));
        }

        let keys = derive_keys(
            options.mode,
            &definition,
            &KeySelection::from_override(options.key_columns.clone()),
        )?;
        if creates_target {
            for column in &mut definition.target_columns {
                column.is_primary_key = keys.iter().any(|k| k.same_name(column));
                if column.is_primary_key {
                    column.nullable = false;
                }
            }
        }
        let positions = definition.source_positions(&source_columns)?;

        let (policy, downgrade) = CommitPolicy::resolve(
            options.batch_size,
            options.commit_every,
            self.target.supports_batch_updates(),
            options.mode,
        );
        if let Some(reason) = &downgrade {
            tracing::warn!(reason = %reason, "batch mode disabled");
        }

        tracing::debug!(
            mapped = definition.len(),
            skipped = definition.has_skipped_columns,
            keys = keys.len(),
            creates_target,
            "copy configured"
        );
        Ok(CopyPlan {
            mapping,
            definition,
            keys,
            positions,
            policy,
            warnings: downgrade.into_iter().collect(),
            target_exists,
            creates_target,
        })
    }

    async fn setup_target(
        &self,
        target: &TableRef,
        options: &CopyOptions,
        plan: &CopyPlan,
        result: &mut CopyResult,
    ) -> Result<(), CopyError> {
        let quoted = target.qualified(|s| self.target.quote_identifier(s));

        if let Some(schema) = self.target.as_schema_mutation() {
            if options.drop_target && plan.target_exists {
                match schema.drop_table(target, false).await {
                    Ok(()) => tracing::info!(table = %target, "dropped target"),
                    Err(e) if options.ignore_drop_error => {
                        tracing::warn!(table = %target, error = %e, "ignoring drop failure");
                        result.warnings.push(format!("Drop of {} failed and was ignored: {}", target, e));
                    }
                    Err(e) => {
                        return Err(CopyError::Schema(format!("Cannot drop {}: {}", target, e)));
                    }
                }
            }
            if plan.creates_target {
                schema
                    .create_table(target, &plan.definition.target_columns)
                    .await
                    .map_err(|e| CopyError::Schema(format!("Cannot create {}: {}", target, e)))?;
                tracing::info!(table = %target, columns = plan.definition.len(), "created target");
            }
        }

        if options.delete_target && !plan.creates_target {
            let deleted = self
                .target
                .execute(&format!("DELETE FROM {}", quoted), &[])
                .await
                .map_err(|e| CopyError::Connection(format!("Cannot empty {}: {}", target, e)))?;
            tracing::info!(table = %target, rows = deleted.affected_rows, "deleted existing target rows");
        }

        if let Some(sql) = options.pre_sql.as_deref().filter(|s| !s.trim().is_empty()) {
            self.target.execute(sql, &[]).await.map_err(|e| {
                CopyError::Configuration(format!("Pre-table statement failed: {}", e))
            })?;
            tracing::debug!("executed pre-table statement");
        }
        Ok(())
    }

    /// Move rows until the source is exhausted, a fatal error occurs or
    /// cancellation is observed.
    #[allow(clippy::too_many_arguments)]
    async fn pump(
        &self,
        source: &mut dyn RowSource,
        writer: &mut DmlWriter,
        plan: &CopyPlan,
        options: &CopyOptions,
        cancel: &CancellationToken,
        reporter: &mut ProgressReporter,
        result: &mut CopyResult,
    ) -> CopyStatus {
        let coerce = source.yields_text();

        let cancelled = loop {
            if cancel.is_cancelled() {
                tracing::info!(rows = result.rows_processed, "cancellation observed");
                break true;
            }
            let Some(next) = source.next_row().await else {
                break false;
            };
            result.rows_processed += 1;
            let ordinal = result.rows_processed;

            let written = match next.and_then(|values| project(values, plan, coerce, ordinal)) {
                Ok(row) => writer.write(ordinal, row).await,
                Err(e) if e.is_row_level() && options.continue_on_error => {
                    tracing::warn!(error = %e, "unreadable row skipped");
                    result.rejected += 1;
                    Ok(vec![e])
                }
                Err(e) => Err(e),
            };
            match written {
                Ok(rejections) => record_rejections(result, rejections),
                Err(e) => {
                    tracing::error!(row = ordinal, error = %e, "aborting copy");
                    writer.abort().await;
                    result.errors.push(e.to_string());
                    return CopyStatus::Failed;
                }
            }
            reporter.rows_processed(ordinal);
        };

        match writer.finish().await {
            Ok(rejections) => record_rejections(result, rejections),
            Err(e) => {
                tracing::error!(error = %e, "final flush failed");
                writer.abort().await;
                result.errors.push(e.to_string());
                if !cancelled {
                    return CopyStatus::Failed;
                }
            }
        }

        if cancelled {
            CopyStatus::Cancelled
        } else {
            CopyStatus::Completed
        }
    }
}

/// Reorder source values into mapped target order, coercing text when the
/// source produces it.
fn project(
    values: Vec<Value>,
    plan: &CopyPlan,
    coerce: bool,
    ordinal: u64,
) -> Result<Vec<Value>, CopyError> {
    plan.positions
        .iter()
        .zip(&plan.definition.source_columns)
        .map(|(&position, column)| {
            let value = values.get(position).cloned().unwrap_or(Value::Null);
            if !coerce {
                return Ok(value);
            }
            coerce_text(value, column.sql_type).map_err(|message| CopyError::SourceRead {
                row: ordinal,
                message: format!("column {}: {}", column.name, message),
            })
        })
        .collect()
}

fn record_rejections(result: &mut CopyResult, rejections: Rejections) {
    for rejection in rejections {
        result.warnings.push(rejection.to_string());
    }
}

async fn close_source(source: &mut dyn RowSource) {
    if let Err(e) = source.close().await {
        tracing::warn!(source = %source.label(), error = %e, "closing source failed");
    }
}

/// Handle on a copy running on its own task.
pub struct CopyHandle {
    cancel: CancellationToken,
    state: watch::Receiver<CopyState>,
    progress: watch::Receiver<CopyProgress>,
    join: JoinHandle<Result<CopyResult, CopyError>>,
}

impl CopyHandle {
    /// Ask the copy to stop at the next row or batch boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> CopyState {
        *self.state.borrow()
    }

    pub fn progress(&self) -> CopyProgress {
        *self.progress.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CopyState> {
        self.state.clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<CopyProgress> {
        self.progress.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> Result<CopyResult, CopyError> {
        self.join
            .await
            .map_err(|e| CopyError::Worker(e.to_string()))?
    }
}
