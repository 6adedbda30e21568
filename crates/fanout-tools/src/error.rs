//! Error types for fanout-tools

use thiserror::Error;

/// Tool error type
#[derive(Debug, Error)]
pub enum Error {
    /// Tool not found
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Input is not a JSON object or otherwise unusable
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Arguments failed schema validation; the caller may retry
    #[error("{0}")]
    Validation(String),

    /// A one-shot tool was called after it already produced its value
    #[error("result already set: {0}")]
    AlreadySet(String),

    /// Tool execution failed
    #[error("execution failed: {0}")]
    Execution(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
