//! tablecopy core - contracts shared by the copy engine and its stores
//!
//! This crate provides the narrow interfaces the copy engine consumes from
//! a relational store. It defines:
//!
//! - `Connection` - execute DML, stream rows, describe statements, run batches
//! - `Transaction` - a unit of work with optional `SavepointSupport`
//! - `ColumnCatalog` - column descriptors for an existing table
//! - `SchemaMutation` - the minimal CREATE/DROP needed to stage a target
//! - Common types like `Value`, `Row`, `ColumnDescriptor`, `SqlType`

mod catalog;
mod column;
mod connection;
mod error;
pub mod transaction;
mod types;

pub use catalog::*;
pub use column::*;
pub use connection::*;
pub use error::*;
pub use transaction::*;
pub use types::*;
