//! Error types for cistern

use thiserror::Error;

/// Core error type for cistern operations
#[derive(Error, Debug)]
pub enum CisternError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Statement error: {0}")]
    Statement(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transaction coordinator error: {0}")]
    Coordinator(String),

    #[error("Cannot enlist connection: {0}")]
    Enlistment(String),

    #[error("No more connections: gave up after waiting {waited_ms} ms for a free connection")]
    PoolTimeout { waited_ms: u64 },

    #[error("No more connections: pool is at capacity and no waiter slot is available")]
    PoolOverflow,

    #[error("{0}")]
    Other(String),
}

/// Result type alias for cistern operations
pub type Result<T> = std::result::Result<T, CisternError>;
