//! Client error types

use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Peer closed the connection
    #[error("Disconnected")]
    Disconnected,

    /// Request exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Server answered with an error response
    #[error("Server error{}: {message}", .code.as_deref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    Server {
        code: Option<String>,
        message: String,
    },

    /// Invalid frame or payload
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local store I/O failure
    #[error("Local store error: {0}")]
    Store(String),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
