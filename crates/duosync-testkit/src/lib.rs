//! # DuoSync Testkit
//!
//! Testing utilities for DuoSync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Generators**: Proptest strategies for items and devices
//! - **Fixtures**: Loopback peers, an event probe, and a hand-driven protocol peer
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use duosync_testkit::fixtures::{connect_pair, TestPeer};
//!
//! async fn example() {
//!     let mut server = TestPeer::new("server");
//!     let mut client = TestPeer::new("client");
//!     connect_pair(&mut server, &mut client).await;
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{connect_pair, wait_for_state, EventProbe, RawPeer, TestPeer};
pub use generators::{device_info, sync_item, unique_items};

use tracing_subscriber::filter::LevelFilter;

/// Route log output through the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}
