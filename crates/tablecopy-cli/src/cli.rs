//! tablecopy - copy rows from a table, a query or a delimited file into a
//! SQLite table.
//!
//! Exit codes: 0 completed, 1 failed while copying, 2 rejected before any
//! row moved, 130 cancelled.

mod config;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use tablecopy_core::Connection;
use tablecopy_engine::{
    CopyError, CopyPreview, CopyProgress, CopyResult, CopyStatus, Copier, MappingOverride,
};
use tablecopy_sqlite::SqliteConnection;

use crate::config::{JobConfig, SourceKind};
use crate::logging::LoggingConfig;

const EXIT_FAILED: u8 = 1;
const EXIT_REJECTED: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

/// Warnings echoed after the summary; the rest are counted only
const WARNINGS_SHOWN: usize = 20;

#[derive(Debug, Parser)]
#[command(name = "tablecopy", version, about = "Bulk copy rows into a SQLite table")]
struct Args {
    /// TOML job file; flags override its values
    #[arg(short, long, env = "TABLECOPY_JOB")]
    job: Option<PathBuf>,

    /// SQLite database holding the source table or query
    #[arg(long, env = "TABLECOPY_SOURCE_DB")]
    source_db: Option<String>,

    /// Copy from this table (`table` or `schema.table`)
    #[arg(long, conflicts_with_all = ["query", "file"])]
    source_table: Option<String>,

    /// Filter applied to the source table
    #[arg(long = "where", requires = "source_table")]
    where_clause: Option<String>,

    /// Copy the rows of this SELECT
    #[arg(long, conflicts_with = "file")]
    query: Option<String>,

    /// Copy from a delimited file
    #[arg(long)]
    file: Option<PathBuf>,

    #[arg(long)]
    delimiter: Option<String>,

    /// The file has no header row
    #[arg(long)]
    no_header: bool,

    /// SQLite database holding the target table
    #[arg(long, env = "TABLECOPY_TARGET_DB")]
    target_db: Option<String>,

    #[arg(short, long)]
    target: Option<String>,

    /// insert, update, insert,update or update,insert
    #[arg(short, long)]
    mode: Option<String>,

    /// Rows per batch; 0 writes row by row
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Rows per commit in row mode; any value commits each batch in batch mode
    #[arg(long)]
    commit_every: Option<u64>,

    #[arg(long)]
    continue_on_error: bool,

    #[arg(long)]
    delete_target: bool,

    #[arg(long)]
    drop_target: bool,

    #[arg(long, requires = "drop_target")]
    ignore_drop_error: bool,

    #[arg(long)]
    create_target: bool,

    #[arg(long)]
    pre_sql: Option<String>,

    #[arg(long)]
    post_sql: Option<String>,

    /// Key columns replacing the target's primary key
    #[arg(short, long, value_delimiter = ',')]
    key: Vec<String>,

    /// `target=source` pair, or `target=` to leave a column unfilled
    #[arg(long = "map", value_parser = parse_mapping)]
    mappings: Vec<MappingOverride>,

    /// Coerce source types to the target's column types
    #[arg(long)]
    sync_types: bool,

    #[arg(long)]
    savepoints: bool,

    #[arg(long)]
    report_interval: Option<u64>,

    #[arg(long)]
    max_warnings: Option<usize>,

    /// Resolve and print the plan without copying
    #[arg(long)]
    preview: bool,

    /// Log filter, e.g. `debug` or `warn,tablecopy_engine=info`
    #[arg(long, env = "TABLECOPY_LOG")]
    log_level: Option<String>,

    /// Also write JSON logs under the log directory
    #[arg(long)]
    log_json: bool,
}

fn parse_mapping(value: &str) -> Result<MappingOverride, String> {
    let (target, source) = value
        .split_once('=')
        .ok_or_else(|| format!("expected target=source, got '{}'", value))?;
    let target = target.trim();
    if target.is_empty() {
        return Err(format!("missing target column in '{}'", value));
    }
    Ok(match source.trim() {
        "" => MappingOverride::skip(target),
        source => MappingOverride::bind(target, source),
    })
}

/// Fold command-line flags over the job file.
fn merge_args(config: &mut JobConfig, args: &Args) {
    let source = &mut config.source;
    if let Some(db) = &args.source_db {
        source.database = Some(db.clone());
    }
    if let Some(table) = &args.source_table {
        source.kind = SourceKind::Table;
        source.table = Some(table.clone());
    }
    if let Some(clause) = &args.where_clause {
        source.where_clause = Some(clause.clone());
    }
    if let Some(sql) = &args.query {
        source.kind = SourceKind::Query;
        source.sql = Some(sql.clone());
    }
    if let Some(path) = &args.file {
        source.kind = SourceKind::File;
        source.path = Some(path.clone());
    }
    if let Some(delimiter) = &args.delimiter {
        source.delimiter = Some(delimiter.clone());
    }
    if args.no_header {
        source.has_header = Some(false);
    }

    if let Some(db) = &args.target_db {
        config.target.database = Some(db.clone());
    }
    if let Some(table) = &args.target {
        config.target.table = Some(table.clone());
    }

    let options = &mut config.options;
    if let Some(mode) = &args.mode {
        options.mode = mode.clone();
    }
    if let Some(size) = args.batch_size {
        options.batch_size = size;
    }
    if let Some(every) = args.commit_every {
        options.commit_every = every;
    }
    options.continue_on_error |= args.continue_on_error;
    options.delete_target |= args.delete_target;
    options.drop_target |= args.drop_target;
    options.ignore_drop_error |= args.ignore_drop_error;
    options.create_target |= args.create_target;
    options.sync_data_types |= args.sync_types;
    options.use_savepoints |= args.savepoints;
    if args.pre_sql.is_some() {
        options.pre_sql = args.pre_sql.clone();
    }
    if args.post_sql.is_some() {
        options.post_sql = args.post_sql.clone();
    }
    if !args.key.is_empty() {
        options.key_columns = args.key.clone();
    }
    if args.report_interval.is_some() {
        options.report_interval = args.report_interval;
    }
    if let Some(max) = args.max_warnings {
        options.max_warnings = max;
    }
    config.mapping.extend(args.mappings.iter().cloned());

    if let Some(level) = &args.log_level {
        config.logging.level = Some(level.clone());
    }
    if args.log_json {
        config.logging.json = Some(true);
    }
}

fn open_sqlite(path: &str) -> anyhow::Result<Arc<dyn Connection>> {
    let conn = SqliteConnection::open(path)
        .with_context(|| format!("Failed to open SQLite database {}", path))?;
    Ok(Arc::new(conn))
}

fn print_preview(preview: &CopyPreview) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Source column", "Target column", "Key"]);
    for (source, target) in &preview.pairs {
        let is_key = preview.key_columns.iter().any(|k| k.eq_ignore_ascii_case(target));
        table.add_row(vec![source.as_str(), target.as_str(), if is_key { "yes" } else { "" }]);
    }
    println!("{table}");

    if !preview.unfilled_targets.is_empty() {
        println!("Unfilled target columns: {}", preview.unfilled_targets.join(", "));
    }
    if preview.creates_target {
        println!("Target table will be created");
    }
    println!("Commit policy: {}", preview.commit_policy);
    if let Some(sql) = &preview.insert_sql {
        println!("Insert: {}", sql);
    }
    if let Some(sql) = &preview.update_sql {
        println!("Update: {}", sql);
    }
    for warning in &preview.warnings {
        println!("warning: {}", warning);
    }
}

fn print_result(result: &CopyResult) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Field", "Value"]);
    let duration = result
        .duration_ms()
        .map(|ms| format!("{:.2}s", ms as f64 / 1000.0))
        .unwrap_or_default();
    let rows: [(&str, String); 11] = [
        ("Status", result.status.to_string()),
        ("Target", result.target.clone()),
        ("Mode", result.mode.clone()),
        ("Commit policy", result.commit_policy.clone()),
        ("Rows processed", result.rows_processed.to_string()),
        ("Inserted", result.inserted.to_string()),
        ("Updated", result.updated.to_string()),
        ("Unmatched", result.unmatched.to_string()),
        ("Rejected", result.rejected.to_string()),
        ("Batches / commits", format!("{} / {}", result.batches_executed, result.commits)),
        ("Duration", duration),
    ];
    for (name, value) in rows {
        table.add_row(vec![name.to_string(), value]);
    }
    println!("{table}");

    for warning in result.warnings.entries().take(WARNINGS_SHOWN) {
        eprintln!("warning: {}", warning);
    }
    let hidden = result.warnings.total().saturating_sub(WARNINGS_SHOWN as u64);
    if hidden > 0 {
        eprintln!("... and {} more warnings", hidden);
    }
    for error in &result.errors {
        eprintln!("error: {}", error);
    }
}

fn exit_code(status: CopyStatus) -> u8 {
    match status {
        CopyStatus::Completed => 0,
        CopyStatus::Failed => EXIT_FAILED,
        CopyStatus::Cancelled => EXIT_CANCELLED,
    }
}

/// A failed close is logged, never turned into a failed run.
async fn close_target(target: &dyn Connection) -> bool {
    match target.close().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(driver = target.driver_name(), error = %e, "closing target connection failed");
            false
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut config = match &args.job {
        Some(path) => JobConfig::from_file(path)?,
        None => JobConfig::default(),
    };
    merge_args(&mut config, &args);

    let preset = if cfg!(debug_assertions) {
        LoggingConfig::development()
    } else {
        LoggingConfig::production()
    };
    let _log_guard = logging::init(preset.with_settings(&config.logging))?;

    let job = config.to_job()?;
    let target = open_sqlite(config.target_database()?)?;
    let mut copier = Copier::new(target.clone());
    if let Some(path) = config.source_database()? {
        copier = copier.with_source_connection(open_sqlite(path)?);
    }

    if args.preview {
        let preview = copier.preview(job).await?;
        print_preview(&preview);
        return Ok(ExitCode::SUCCESS);
    }

    let copier = copier.with_progress_callback(Arc::new(|progress: CopyProgress| {
        match progress.percent() {
            Some(percent) => {
                tracing::info!(rows = progress.rows_processed, percent = %format!("{:.1}", percent), "progress")
            }
            None => tracing::info!(rows = progress.rows_processed, "progress"),
        }
    }));

    let target_name = job.target.clone();
    let handle = copier.start(job);
    let token = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current row");
            token.cancel();
        }
    });

    let outcome = handle.wait().await;
    interrupt.abort();
    close_target(target.as_ref()).await;

    match outcome {
        Ok(result) => {
            print_result(&result);
            Ok(ExitCode::from(exit_code(result.status)))
        }
        Err(CopyError::Worker(message)) => {
            anyhow::bail!("copy worker for {} stopped: {}", target_name, message)
        }
        Err(e) => {
            tracing::error!(table = %target_name, class = ?e.class(), "copy rejected");
            eprintln!("error: {}", e);
            Ok(ExitCode::from(EXIT_REJECTED))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_REJECTED)
        }
    }
}
