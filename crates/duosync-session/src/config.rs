//! Session configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Fallback device name when the host identity is unavailable.
pub const DEFAULT_DEVICE_NAME: &str = "duosync-device";

/// Configuration for session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name advertised to the peer in `DEVICE_INFO`.
    pub device_name: String,
    /// Address the server's listening endpoint binds to.
    pub bind_address: IpAddr,
    /// Deadline for each accept on the listening endpoint.
    pub accept_timeout: Duration,
    /// Deadline for the verification exchange. For clients this bounds the
    /// whole handshake, including the second connect.
    pub handshake_timeout: Duration,
    /// How long a graceful disconnect waits for the peer's acknowledgement.
    pub disconnect_grace: Duration,
    /// Send and receive buffer size for every connection.
    pub socket_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: host_device_name(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            accept_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            disconnect_grace: Duration::from_secs(1),
            socket_buffer_size: 8 * 1024,
        }
    }
}

impl SessionConfig {
    /// Set the advertised device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the listening address.
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Use one deadline for accept and handshake.
    pub fn with_timeouts(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self.handshake_timeout = timeout;
        self
    }

    /// Set the graceful-disconnect wait.
    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }
}

/// Host identity from the environment, or [`DEFAULT_DEVICE_NAME`].
pub fn host_device_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string())
}
