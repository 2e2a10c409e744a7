//! Peer discovery abstraction.
//!
//! Discovery produces candidate endpoints for `connect`. Implementations may
//! use mDNS/DNS-SD, a broadcast beacon, or anything else; the engine itself
//! never calls into discovery.

use async_trait::async_trait;
use thiserror::Error;

use duosync_core::DeviceInfo;

/// Errors reported by a discovery implementation.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The local service could not be advertised.
    #[error("registration failed: {0}")]
    Registration(String),

    /// Browsing for peers could not start.
    #[error("discovery failed: {0}")]
    Browse(String),
}

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Discovery trait for advertising this device and finding peers.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Advertise a service named `name` on `port`.
    async fn register_local_service(&self, name: &str, port: u16) -> Result<()>;

    /// Start browsing for peers.
    async fn start_discovery(&self) -> Result<()>;

    /// Peers found so far. Safe to poll repeatedly.
    async fn list_discovered_peers(&self) -> Vec<DeviceInfo>;

    /// Withdraw the advertisement and stop browsing.
    async fn stop_all(&self);
}

/// A simple in-memory discovery for tests and single-host use.
///
/// Devices sharing one [`MemoryRegistry`] see each other's registrations.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// Shared registry of advertised services.
    pub struct MemoryRegistry {
        /// Advertised services by name.
        services: RwLock<HashMap<String, DeviceInfo>>,
    }

    impl MemoryRegistry {
        /// Create a new registry.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a discovery handle for a device reachable at `address`.
        pub fn create_discovery(self: &Arc<Self>, address: impl Into<String>) -> MemoryDiscovery {
            MemoryDiscovery {
                registry: Arc::clone(self),
                address: address.into(),
                registered: RwLock::new(None),
                browsing: AtomicBool::new(false),
            }
        }
    }

    impl Default for MemoryRegistry {
        fn default() -> Self {
            Self {
                services: RwLock::new(HashMap::new()),
            }
        }
    }

    /// In-memory discovery implementation.
    pub struct MemoryDiscovery {
        registry: Arc<MemoryRegistry>,
        address: String,
        registered: RwLock<Option<String>>,
        browsing: AtomicBool,
    }

    #[async_trait]
    impl Discovery for MemoryDiscovery {
        async fn register_local_service(&self, name: &str, port: u16) -> Result<()> {
            let mut services = self.registry.services.write().await;
            if services.contains_key(name) {
                return Err(DiscoveryError::Registration(format!(
                    "service name {name:?} already taken"
                )));
            }
            services.insert(
                name.to_string(),
                DeviceInfo::new(name, self.address.clone(), port),
            );
            *self.registered.write().await = Some(name.to_string());
            Ok(())
        }

        async fn start_discovery(&self) -> Result<()> {
            self.browsing.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn list_discovered_peers(&self) -> Vec<DeviceInfo> {
            if !self.browsing.load(Ordering::SeqCst) {
                return Vec::new();
            }
            let own = self.registered.read().await.clone();
            let services = self.registry.services.read().await;
            let mut peers: Vec<DeviceInfo> = services
                .iter()
                .filter(|(name, _)| own.as_deref() != Some(name.as_str()))
                .map(|(_, device)| device.clone())
                .collect();
            peers.sort_by(|a, b| a.name.cmp(&b.name));
            peers
        }

        async fn stop_all(&self) {
            self.browsing.store(false, Ordering::SeqCst);
            if let Some(name) = self.registered.write().await.take() {
                self.registry.services.write().await.remove(&name);
            }
        }
    }
}
