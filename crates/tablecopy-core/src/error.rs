//! Error types for store operations

use thiserror::Error;

/// Core error type for store operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    /// A statement was rejected by the store.
    ///
    /// `sql_state` is the five character SQLSTATE when the driver reports one;
    /// `vendor_code` is the store's native error number.
    #[error("Database error: {message}")]
    Database {
        message: String,
        sql_state: Option<String>,
        vendor_code: Option<i32>,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Build a `Database` error without vendor details.
    pub fn database(message: impl Into<String>) -> Self {
        CoreError::Database {
            message: message.into(),
            sql_state: None,
            vendor_code: None,
        }
    }

    /// SQLSTATE reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            CoreError::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Native vendor error code reported by the driver, if any.
    pub fn vendor_code(&self) -> Option<i32> {
        match self {
            CoreError::Database { vendor_code, .. } => *vendor_code,
            _ => None,
        }
    }
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, CoreError>;
