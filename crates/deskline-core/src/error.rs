//! Error types for Deskline

use thiserror::Error;

/// Core error type for Deskline operations
#[derive(Error, Debug)]
pub enum DesklineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Statement error: {0}")]
    Statement(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Cannot convert column {column} ({found}) to {expected}")]
    Conversion {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No connections available: {0}")]
    NoConnections(String),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl DesklineError {
    /// Whether the error points at a broken transport rather than a bad statement.
    ///
    /// The pool uses this to decide if a connection should be parked for the
    /// maintenance loop instead of going back to the idle queue.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DesklineError::Connection(_) | DesklineError::Io(_) | DesklineError::Timeout(_)
        )
    }
}

/// Result type alias for Deskline operations
pub type Result<T> = std::result::Result<T, DesklineError>;
