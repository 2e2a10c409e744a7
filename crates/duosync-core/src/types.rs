//! Strong type definitions for DuoSync.
//!
//! Identities, items, and session-level enums shared by every layer.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};

/// Number of digits in a connection code.
pub const CODE_LENGTH: usize = 6;

/// One endpoint of a session.
///
/// Produced locally from the host identity and the bound socket address,
/// and received from the peer once the data connection is up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// IP address (or host name) the endpoint is reachable at.
    pub address: String,
    /// TCP port of the endpoint.
    pub port: u16,
}

impl DeviceInfo {
    /// Create a device identity.
    ///
    /// Control characters in the name are replaced with spaces so the name
    /// can never split a line on the wire.
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: sanitize_name(&name.into()),
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.address, self.port)
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Both endpoints of an established session.
///
/// There is no way to build one with a missing side, so listeners only
/// ever see a complete pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// This engine's endpoint.
    pub local: DeviceInfo,
    /// The peer's endpoint.
    pub remote: DeviceInfo,
}

impl ConnectionInfo {
    /// Pair a local and a remote identity.
    pub fn new(local: DeviceInfo, remote: DeviceInfo) -> Self {
        Self { local, remote }
    }
}

/// An immutable, timestamped text item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
    /// Globally unique identifier.
    pub id: String,
    /// Item body.
    pub text: String,
    /// Creation time, Unix milliseconds.
    pub timestamp_millis: i64,
}

impl SyncItem {
    /// Create a new item stamped with the current time and a random id.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: random_id(),
            text: text.into(),
            timestamp_millis: now_millis(),
        }
    }

    /// Create an item with explicit fields.
    pub fn with_id(id: impl Into<String>, text: impl Into<String>, timestamp_millis: i64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            timestamp_millis,
        }
    }
}

fn random_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Lifecycle state of a session engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session; the only state in which a new attempt may start.
    #[default]
    Disconnected,
    /// Exchanging the connection code on a verification connection.
    Verifying,
    /// Code accepted; opening the data connection.
    Connecting,
    /// Data connection up and the message pump running.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Verifying => "verifying",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// A 6-digit numeric connection code.
///
/// Generated fresh for each server session and compared by exact equality.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionCode(String);

impl ConnectionCode {
    /// Generate a fresh random code.
    pub fn generate() -> Self {
        let value: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
        Self(value.to_string())
    }

    /// Parse a code, requiring exactly six ASCII digits.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() == CODE_LENGTH && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(WireError::InvalidCode(s.to_string()))
        }
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact string comparison against a candidate received from a peer.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }
}

impl fmt::Debug for ConnectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionCode(******)")
    }
}

impl fmt::Display for ConnectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of the verification exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// The presented code matched.
    Success,
    /// The presented code was rejected.
    Failure { reason: String },
}

impl VerificationResult {
    /// Build a failure with the given reason.
    pub fn failure(reason: impl Into<String>) -> Self {
        VerificationResult::Failure {
            reason: reason.into(),
        }
    }

    /// Check for success.
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationResult::Success)
    }
}
