//! Error types for the session engine.

use std::io;

use duosync_core::{ConnectionState, WireError};
use thiserror::Error;

/// Errors that can occur while establishing or running a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation rejected because a session is already in progress.
    #[error("session already active (state: {0})")]
    AlreadyActive(ConnectionState),

    /// The listening endpoint could not be created.
    #[error("failed to bind listening endpoint: {0}")]
    Bind(#[source] io::Error),

    /// An accept, connect, or verification deadline passed.
    #[error("timed out {0}")]
    Timeout(String),

    /// The peer rejected our code, or we rejected theirs.
    #[error("Verification failed: {0}")]
    VerificationFailure(String),

    /// Malformed frame, unexpected response, or a transport promoted to
    /// data-carrying status without verification.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The stream ended while the session was up.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Generic transport error.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// A send was attempted while not connected.
    #[error("not connected")]
    NotConnected,

    /// The work belonged to a session that has since been torn down.
    #[error("session cancelled")]
    Cancelled,
}

impl From<WireError> for SessionError {
    fn from(e: WireError) -> Self {
        SessionError::ProtocolViolation(e.to_string())
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
