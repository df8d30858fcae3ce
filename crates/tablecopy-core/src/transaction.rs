//! Transaction-related types and traits
//!
//! Adds savepoints on top of the base `Transaction` trait defined in the
//! connection module.

mod savepoint;

pub use savepoint::*;
