//! # DuoSync Session
//!
//! Connection handshake, session state machine, and message pump for two
//! peers sharing one item collection.
//!
//! ## Overview
//!
//! One side hosts: it binds a listening endpoint and publishes a 6-digit
//! code out of band. The other side connects, presents the code on a
//! short-lived verification connection, and only after the host accepts it
//! opens the data connection that carries application traffic.
//!
//! ## Key Properties
//!
//! - **Single session**: An [`Engine`] runs at most one attempt at a time
//! - **Guarded data channel**: No application frame flows before the code matches
//! - **Reported once**: Every failure reaches the listener exactly once
//! - **Always recoverable**: Every path ends in `Disconnected`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duosync_session::{ChannelListener, Engine, SessionConfig};
//!
//! async fn example() {
//!     let (listener, mut events) = ChannelListener::new();
//!     let engine = Engine::new(SessionConfig::default(), Arc::new(listener));
//!
//!     // Host and show the code to the user
//!     let code = engine.start_server(0).unwrap();
//!     println!("code {} on port {:?}", code, engine.listen_port());
//!
//!     // Watch the session
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Client                              Server
//!   |-------- code ------------------>|   verification connection
//!   |<------- VERIFICATION_SUCCESS ---|
//!   |                                  |
//!   |-------- DEVICE_INFO ----------->|   data connection
//!   |<------- DEVICE_INFO ------------|
//!   |-------- SYNC_REQUEST ---------->|
//!   |<------- SYNC_RESPONSE ----------|
//!   |<------> ITEM_ADDED <----------->|
//!   |-------- DISCONNECT_REQUEST ---->|
//!   |<------- DISCONNECT_ACKNOWLEDGE -|
//! ```

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod handshake;
pub mod transport;

mod pump;

pub use config::SessionConfig;
pub use discovery::{
    memory::MemoryDiscovery, memory::MemoryRegistry, Discovery, DiscoveryError,
};
pub use engine::{Engine, Role};
pub use error::{Result, SessionError};
pub use events::{ChannelListener, NoopListener, SessionEvent, SessionListener};
pub use transport::{LineReader, LineStream, LineWriter, TransportCloser, MAX_LINE_BYTES};
