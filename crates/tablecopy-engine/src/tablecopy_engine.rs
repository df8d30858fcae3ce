//! Bulk copy engine
//!
//! Moves rows from a table scan, a query or a delimited file into a target
//! table, reconciling column names, types and keys on the way.
//!
//! # Architecture
//!
//! ```text
//! RowSource ──rows──▶ mapping projection ──▶ DmlWriter ──DML──▶ target
//!     │                      ▲                    │
//!  columns()          MappingDefinition      CommitPolicy
//!     └──▶ resolve_mapping ──┘  derive_keys ──────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let copier = Copier::new(target.clone()).with_source_connection(source);
//! let job = CopyJob::new(CopySource::table(TableRef::new("person")), TableRef::new("person_copy"))
//!     .with_mode_str("update,insert")?
//!     .with_batch_size(500)
//!     .with_create_target(true);
//! let handle = copier.start(job);
//! let result = handle.wait().await?;
//! ```

mod coerce;
mod commit;
mod dml;
mod error;
mod file_source;
mod job;
pub mod mapping;
pub mod mode;
mod orchestrator;
mod progress;
mod result;
mod sink;
mod source;

pub use coerce::coerce_text;
pub use commit::CommitPolicy;
pub use dml::{DmlStatements, DmlTemplate, insert_template, update_template};
pub use error::{CopyError, ErrorClass};
pub use file_source::{FileColumn, FileSource, FileSourceOptions};
pub use job::{CopyJob, CopyOptions, CopySource};
pub use mapping::{
    ColumnMapping, MappingDefinition, MappingEntry, MappingOptions, MappingOverride,
    SourceBinding, identity_mapping, resolve_mapping,
};
pub use mode::{CopyMode, KeySelection, derive_keys};
pub use orchestrator::{CopyHandle, CopyPreview, CopyState, Copier};
pub use progress::{CopyProgress, CopyProgressCallback, DEFAULT_REPORT_INTERVAL, report_interval};
pub use result::{CopyResult, CopyStatus, DEFAULT_MAX_WARNINGS, WarningLog};
pub use sink::{
    ConstraintViolationPredicate, DmlWriter, Rejections, WriterOptions, WriterStats,
    is_integrity_violation, vendor_codes,
};
pub use source::{
    AVERAGE_ROW_BYTES, QuerySource, RowSource, SizeEstimate, TableScanSource, VecSource,
};
