//! Error types for the node.

use duosync_session::{DiscoveryError, SessionError};
use thiserror::Error;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Discovery error.
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
