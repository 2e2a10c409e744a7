//! Error types for the wire codec.

use thiserror::Error;

/// Errors that can occur while decoding a line received from a peer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("wrong field count: expected {expected}, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    #[error("unexpected line: {0:?}")]
    UnexpectedLine(String),

    #[error("invalid connection code: {0:?}")]
    InvalidCode(String),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, WireError>;
