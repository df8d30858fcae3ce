//! Copy job definition

use std::fmt;

use tablecopy_core::TableRef;

use crate::error::CopyError;
use crate::file_source::FileSourceOptions;
use crate::mapping::{MappingOptions, MappingOverride};
use crate::mode::CopyMode;
use crate::result::DEFAULT_MAX_WARNINGS;
use crate::source::RowSource;

/// Where rows come from.
pub enum CopySource {
    /// Scan of a table on the source connection, optionally filtered
    Table {
        table: TableRef,
        where_clause: Option<String>,
    },
    /// A SELECT statement on the source connection
    Query(String),
    /// A delimited file
    File(FileSourceOptions),
    /// Any caller-supplied producer
    Custom(Box<dyn RowSource>),
}

impl CopySource {
    pub fn table(table: TableRef) -> Self {
        CopySource::Table {
            table,
            where_clause: None,
        }
    }

    /// Whether the source needs a connection
    pub fn uses_connection(&self) -> bool {
        matches!(self, CopySource::Table { .. } | CopySource::Query(_))
    }
}

impl fmt::Debug for CopySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopySource::Table { table, where_clause } => f
                .debug_struct("Table")
                .field("table", table)
                .field("where_clause", where_clause)
                .finish(),
            CopySource::Query(sql) => f.debug_tuple("Query").field(sql).finish(),
            CopySource::File(options) => f.debug_tuple("File").field(&options.path).finish(),
            CopySource::Custom(source) => f.debug_tuple("Custom").field(&source.label()).finish(),
        }
    }
}

/// Run-level settings.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub mode: CopyMode,
    /// Rows per driver batch; 0 writes rows one at a time
    pub batch_size: usize,
    /// Rows per commit in row mode; in batch mode any value > 0 commits each batch
    pub commit_every: u64,
    pub continue_on_error: bool,
    /// DELETE existing target rows before copying
    pub delete_target: bool,
    /// DROP the target before copying; requires `create_target`
    pub drop_target: bool,
    pub ignore_drop_error: bool,
    /// CREATE the target from the source's shape when it does not exist
    pub create_target: bool,
    /// Executed on the target before the first row
    pub pre_sql: Option<String>,
    /// Executed on the target after a completed run
    pub post_sql: Option<String>,
    /// Replaces primary-key flags when non-empty
    pub key_columns: Vec<String>,
    /// Rows between progress reports; derived from the source size if unset
    pub report_interval: Option<u64>,
    pub max_warnings: usize,
    /// Guard single-row statements with savepoints where available
    pub use_savepoints: bool,
    pub mapping: Vec<MappingOverride>,
    pub mapping_options: MappingOptions,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            mode: CopyMode::InsertOnly,
            batch_size: 0,
            commit_every: 0,
            continue_on_error: false,
            delete_target: false,
            drop_target: false,
            ignore_drop_error: false,
            create_target: false,
            pre_sql: None,
            post_sql: None,
            key_columns: Vec::new(),
            report_interval: None,
            max_warnings: DEFAULT_MAX_WARNINGS,
            use_savepoints: false,
            mapping: Vec::new(),
            mapping_options: MappingOptions::default(),
        }
    }
}

/// One copy run: a source, a target table and how to write it.
#[derive(Debug)]
pub struct CopyJob {
    pub source: CopySource,
    pub target: TableRef,
    pub options: CopyOptions,
}

impl CopyJob {
    pub fn new(source: CopySource, target: TableRef) -> Self {
        Self {
            source,
            target,
            options: CopyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_mode(mut self, mode: CopyMode) -> Self {
        self.options.mode = mode;
        self
    }

    /// Set the mode from one of its literals.
    pub fn with_mode_str(self, mode: &str) -> Result<Self, CopyError> {
        Ok(self.with_mode(CopyMode::parse(mode)?))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.options.batch_size = batch_size;
        self
    }

    pub fn with_commit_every(mut self, commit_every: u64) -> Self {
        self.options.commit_every = commit_every;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.options.continue_on_error = continue_on_error;
        self
    }

    pub fn with_delete_target(mut self, delete_target: bool) -> Self {
        self.options.delete_target = delete_target;
        self
    }

    pub fn with_drop_target(mut self, drop_target: bool, ignore_drop_error: bool) -> Self {
        self.options.drop_target = drop_target;
        self.options.ignore_drop_error = ignore_drop_error;
        self
    }

    pub fn with_create_target(mut self, create_target: bool) -> Self {
        self.options.create_target = create_target;
        self
    }

    pub fn with_pre_sql(mut self, sql: impl Into<String>) -> Self {
        self.options.pre_sql = Some(sql.into());
        self
    }

    pub fn with_post_sql(mut self, sql: impl Into<String>) -> Self {
        self.options.post_sql = Some(sql.into());
        self
    }

    pub fn with_key_columns(mut self, columns: Vec<String>) -> Self {
        self.options.key_columns = columns;
        self
    }

    pub fn with_report_interval(mut self, rows: u64) -> Self {
        self.options.report_interval = Some(rows);
        self
    }

    pub fn with_mapping(mut self, overrides: Vec<MappingOverride>) -> Self {
        self.options.mapping = overrides;
        self
    }

    pub fn with_mapping_options(mut self, options: MappingOptions) -> Self {
        self.options.mapping_options = options;
        self
    }

    pub fn with_savepoints(mut self, use_savepoints: bool) -> Self {
        self.options.use_savepoints = use_savepoints;
        self
    }

    /// Checks that need neither connection.
    pub fn validate(&self) -> Result<(), CopyError> {
        let options = &self.options;
        if self.target.name.trim().is_empty() {
            return Err(CopyError::Configuration("Target table name is empty".to_string()));
        }
        if options.drop_target && !options.create_target {
            return Err(CopyError::Configuration(
                "Dropping the target requires creating it again".to_string(),
            ));
        }
        if let CopySource::Query(sql) = &self.source {
            if sql.trim().is_empty() {
                return Err(CopyError::Configuration("Source query is empty".to_string()));
            }
        }
        Ok(())
    }
}
