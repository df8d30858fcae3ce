//! TOML job files
//!
//! ```toml
//! [source]
//! kind = "table"
//! database = "crm.db"
//! table = "person"
//! where = "active = 1"
//!
//! [target]
//! database = "warehouse.db"
//! table = "person"
//!
//! [options]
//! mode = "update,insert"
//! batch_size = 500
//!
//! [[mapping]]
//! target = "surname"
//! source = "last_name"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use serde::Deserialize;
use tablecopy_core::TableRef;
use tablecopy_engine::{
    CopyJob, CopyMode, CopyOptions, CopySource, DEFAULT_MAX_WARNINGS, FileColumn,
    FileSourceOptions, MappingOptions, MappingOverride,
};

use crate::logging::LogSettings;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub options: OptionsConfig,
    pub mapping: Vec<MappingOverride>,
    pub logging: LogSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Table,
    Query,
    File,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// SQLite database for table and query sources
    pub database: Option<String>,
    pub table: Option<String>,
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    pub sql: Option<String>,
    pub path: Option<PathBuf>,
    pub delimiter: Option<String>,
    pub quote: Option<String>,
    pub has_header: Option<bool>,
    pub empty_as_null: bool,
    pub trim: bool,
    pub columns: Vec<FileColumnConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    pub database: Option<String>,
    /// `table` or `schema.table`
    pub table: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsConfig {
    pub mode: String,
    pub batch_size: usize,
    pub commit_every: u64,
    pub continue_on_error: bool,
    pub delete_target: bool,
    pub drop_target: bool,
    pub ignore_drop_error: bool,
    pub create_target: bool,
    pub pre_sql: Option<String>,
    pub post_sql: Option<String>,
    pub key_columns: Vec<String>,
    pub report_interval: Option<u64>,
    pub max_warnings: usize,
    pub use_savepoints: bool,
    pub sync_data_types: bool,
    pub keep_source_order: bool,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            mode: CopyMode::default().as_str().to_string(),
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
            sync_data_types: false,
            keep_source_order: false,
        }
    }
}

impl JobConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid job file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Database the source rows are read from, if the source needs one.
    pub fn source_database(&self) -> anyhow::Result<Option<&str>> {
        match self.source.kind {
            SourceKind::File => Ok(None),
            SourceKind::Table | SourceKind::Query => self
                .source
                .database
                .as_deref()
                .map(Some)
                .ok_or_else(|| anyhow!("Source database is not set")),
        }
    }

    pub fn target_database(&self) -> anyhow::Result<&str> {
        self.target
            .database
            .as_deref()
            .ok_or_else(|| anyhow!("Target database is not set"))
    }

    /// Build the engine job this file describes.
    pub fn to_job(&self) -> anyhow::Result<CopyJob> {
        let target = self
            .target
            .table
            .as_deref()
            .map(TableRef::parse)
            .ok_or_else(|| anyhow!("Target table is not set"))?;
        Ok(CopyJob::new(self.build_source()?, target).with_options(self.build_options()?))
    }

    fn build_source(&self) -> anyhow::Result<CopySource> {
        let source = &self.source;
        match source.kind {
            SourceKind::Table => {
                let table = source
                    .table
                    .as_deref()
                    .ok_or_else(|| anyhow!("Source table is not set"))?;
                Ok(CopySource::Table {
                    table: TableRef::parse(table),
                    where_clause: source.where_clause.clone(),
                })
            }
            SourceKind::Query => source
                .sql
                .clone()
                .map(CopySource::Query)
                .ok_or_else(|| anyhow!("Source query is not set")),
            SourceKind::File => {
                let path = source
                    .path
                    .clone()
                    .ok_or_else(|| anyhow!("Source file path is not set"))?;
                let mut options = FileSourceOptions::new(path)
                    .with_header(source.has_header.unwrap_or(true))
                    .with_empty_as_null(source.empty_as_null)
                    .with_trim(source.trim)
                    .with_columns(
                        source
                            .columns
                            .iter()
                            .map(|c| match &c.type_name {
                                Some(type_name) => FileColumn::typed(&c.name, type_name),
                                None => FileColumn::new(&c.name),
                            })
                            .collect(),
                    );
                if let Some(delimiter) = &source.delimiter {
                    options = options.with_delimiter(single_byte("delimiter", delimiter)?);
                }
                if let Some(quote) = &source.quote {
                    options.quote = single_byte("quote", quote)?;
                }
                Ok(CopySource::File(options))
            }
        }
    }

    fn build_options(&self) -> anyhow::Result<CopyOptions> {
        let o = &self.options;
        Ok(CopyOptions {
            mode: CopyMode::parse(&o.mode)?,
            batch_size: o.batch_size,
            commit_every: o.commit_every,
            continue_on_error: o.continue_on_error,
            delete_target: o.delete_target,
            drop_target: o.drop_target,
            ignore_drop_error: o.ignore_drop_error,
            create_target: o.create_target,
            pre_sql: o.pre_sql.clone(),
            post_sql: o.post_sql.clone(),
            key_columns: o.key_columns.clone(),
            report_interval: o.report_interval,
            max_warnings: o.max_warnings,
            use_savepoints: o.use_savepoints,
            mapping: self.mapping.clone(),
            mapping_options: MappingOptions {
                sync_data_types: o.sync_data_types,
                keep_source_order: o.keep_source_order,
            },
        })
    }
}

/// `"\t"` and `"\\t"` both mean tab.
pub fn single_byte(name: &str, value: &str) -> anyhow::Result<u8> {
    let value = if value == "\\t" { "\t" } else { value };
    match value.as_bytes() {
        [byte] => Ok(*byte),
        _ => bail!("{} must be a single ASCII character, got {:?}", name, value),
    }
}
