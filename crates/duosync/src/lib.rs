//! # DuoSync
//!
//! Keep one item collection in step between two devices on the same
//! network.
//!
//! ## Overview
//!
//! - **Hosting**: One device listens and shows a 6-digit code
//! - **Joining**: The other presents the code, then both exchange identities
//! - **Reconciliation**: Collections are merged by id, newest first
//! - **Live updates**: New items are pushed to the peer as they are created
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duosync::{Node, NodeConfig};
//! use duosync::session::{MemoryRegistry, NoopListener};
//!
//! async fn example() {
//!     let registry = MemoryRegistry::new();
//!     let node = Node::new(
//!         NodeConfig::default(),
//!         registry.create_discovery("127.0.0.1"),
//!         Arc::new(NoopListener),
//!     );
//!
//!     // Host and hand the code to the other user
//!     let code = node.host(0).await.unwrap();
//!     println!("enter {} on the other device", code);
//!
//!     // Items created now reach the peer once it has joined
//!     node.add_item("buy milk");
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `duosync::core` - Data model, wire codec, reconciliation
//! - `duosync::session` - Engine, handshake, listener, discovery

pub mod error;
pub mod node;

// Re-export component crates
pub use duosync_core as core;
pub use duosync_session as session;

pub use error::{NodeError, Result};
pub use node::{Node, NodeConfig};

// Re-export commonly used types
pub use duosync_core::{
    ConnectionCode, ConnectionInfo, ConnectionState, DeviceInfo, SyncItem, SyncMessage,
};
pub use duosync_session::{
    ChannelListener, Discovery, Engine, SessionConfig, SessionError, SessionEvent,
    SessionListener,
};
