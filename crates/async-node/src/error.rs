//! Error types for the async node runtime

use thiserror::Error;

/// Result type alias using NodeError
pub type Result<T> = std::result::Result<T, NodeError>;

/// Errors that can occur while gathering input, running a worker,
/// or writing its output back to the host
#[derive(Debug, Error)]
pub enum NodeError {
    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// Invalid input type
    #[error("Invalid input type for '{port}': expected {expected}")]
    InvalidInputType { port: String, expected: String },

    /// Worker execution failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Operation was cancelled through its token
    #[error("Operation cancelled")]
    Cancelled,

    /// Remote endpoint error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create an HTTP error with a message
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Whether this error represents a cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
