//! SQLite store implementation for the copy engine

mod catalog;
mod connection;
mod convert;

pub use connection::{SqliteConnection, SqliteTransaction};
