//! The Node: an engine paired with a discovery collaborator.
//!
//! The engine never looks peers up itself. A node advertises the hosted
//! session through discovery and turns discovered peers into `connect`
//! calls.

use std::sync::Arc;

use tokio::sync::Mutex;

use duosync_core::{ConnectionCode, ConnectionState, DeviceInfo, SyncItem};
use duosync_session::{Discovery, Engine, SessionConfig, SessionListener};

use crate::error::Result;

/// Configuration for a [`Node`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Engine configuration.
    pub session: SessionConfig,
    /// Whether `host` advertises the session through discovery.
    pub advertise: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            advertise: true,
        }
    }
}

/// A device taking part in a two-peer sync.
pub struct Node<D: Discovery> {
    engine: Engine,
    discovery: D,
    config: NodeConfig,
    /// True while our service is registered.
    advertised: Mutex<bool>,
}

impl<D: Discovery> Node<D> {
    /// Create a node reporting session events to `listener`.
    pub fn new(config: NodeConfig, discovery: D, listener: Arc<dyn SessionListener>) -> Self {
        Self {
            engine: Engine::new(config.session.clone(), listener),
            discovery,
            config,
            advertised: Mutex::new(false),
        }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn discovery(&self) -> &D {
        &self.discovery
    }

    pub fn state(&self) -> ConnectionState {
        self.engine.state()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Hosting and Joining
    // ─────────────────────────────────────────────────────────────────────────

    /// Start hosting on `port` and, if configured, advertise it.
    ///
    /// If advertising fails the hosted session is torn down again.
    pub async fn host(&self, port: u16) -> Result<ConnectionCode> {
        let code = self.engine.start_server(port)?;
        if !self.config.advertise {
            return Ok(code);
        }

        let Some(bound) = self.engine.listen_port() else {
            // Torn down before we could look; nothing left to advertise.
            return Ok(code);
        };

        let mut advertised = self.advertised.lock().await;
        if *advertised {
            self.discovery.stop_all().await;
            *advertised = false;
        }
        if let Err(e) = self
            .discovery
            .register_local_service(&self.config.session.device_name, bound)
            .await
        {
            tracing::warn!("could not advertise session: {}", e);
            drop(advertised);
            self.engine.disconnect().await;
            return Err(e.into());
        }
        *advertised = true;
        tracing::info!(
            "advertising {} on port {}",
            self.config.session.device_name,
            bound
        );
        Ok(code)
    }

    /// Start looking for peers.
    pub async fn browse(&self) -> Result<()> {
        self.discovery.start_discovery().await?;
        Ok(())
    }

    /// Peers discovered so far.
    pub async fn peers(&self) -> Vec<DeviceInfo> {
        self.discovery.list_discovered_peers().await
    }

    /// Connect to a discovered peer presenting `code`.
    pub fn join(&self, peer: &DeviceInfo, code: &str) -> Result<()> {
        tracing::info!("joining {}", peer);
        self.engine.connect(&peer.address, peer.port, code)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Items
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an item and share it with the peer if connected.
    pub fn add_item(&self, text: impl Into<String>) -> SyncItem {
        self.engine.send_item(text)
    }

    pub fn items(&self) -> Vec<SyncItem> {
        self.engine.items()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────────────────

    /// End the current session. The advertisement, if any, stays until
    /// the next `host` or `shutdown`.
    pub async fn leave(&self) {
        self.engine.disconnect().await;
    }

    /// End the session and stop all discovery activity.
    pub async fn shutdown(&self) {
        self.engine.disconnect().await;
        self.discovery.stop_all().await;
        *self.advertised.lock().await = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duosync_session::{MemoryDiscovery, MemoryRegistry, NoopListener};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn test_node(registry: &Arc<MemoryRegistry>, name: &str, advertise: bool) -> Node<MemoryDiscovery> {
        let config = NodeConfig {
            session: SessionConfig::default()
                .with_device_name(name)
                .with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_timeouts(Duration::from_secs(5)),
            advertise,
        };
        Node::new(
            config,
            registry.create_discovery("127.0.0.1"),
            Arc::new(NoopListener),
        )
    }

    async fn connected(node: &Node<MemoryDiscovery>) {
        let mut rx = node.engine().subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_host_advertises_bound_port() {
        let registry = MemoryRegistry::new();
        let host = test_node(&registry, "desk", true);
        let guest = test_node(&registry, "phone", true);

        host.host(0).await.unwrap();
        guest.browse().await.unwrap();

        let peers = guest.peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "desk");
        assert_eq!(Some(peers[0].port), host.engine().listen_port());

        host.shutdown().await;
        assert!(guest.peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_discovered_peer() {
        let registry = MemoryRegistry::new();
        let host = test_node(&registry, "desk", true);
        let guest = test_node(&registry, "phone", false);

        let code = host.host(0).await.unwrap();
        guest.browse().await.unwrap();
        let peer = guest.peers().await.remove(0);

        guest.join(&peer, code.as_str()).unwrap();
        connected(&host).await;
        connected(&guest).await;

        guest.leave().await;
        host.shutdown().await;
        assert_eq!(guest.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_host_without_advertising() {
        let registry = MemoryRegistry::new();
        let host = test_node(&registry, "desk", false);
        let guest = test_node(&registry, "phone", false);

        host.host(0).await.unwrap();
        guest.browse().await.unwrap();
        assert!(guest.peers().await.is_empty());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_advertisement_rolls_back_hosting() {
        let registry = MemoryRegistry::new();
        let squatter = registry.create_discovery("10.0.0.9");
        squatter.register_local_service("desk", 1).await.unwrap();
        let host = test_node(&registry, "desk", true);

        let result = host.host(0).await;

        assert!(matches!(result, Err(crate::NodeError::Discovery(_))));
        assert_eq!(host.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rehost_replaces_advertisement() {
        let registry = MemoryRegistry::new();
        let host = test_node(&registry, "desk", true);

        host.host(0).await.unwrap();
        host.leave().await;
        host.host(0).await.unwrap();

        assert_eq!(host.state(), ConnectionState::Verifying);
        host.shutdown().await;
    }
}
