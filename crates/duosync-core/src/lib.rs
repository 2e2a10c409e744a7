//! # DuoSync Core
//!
//! Pure primitives for DuoSync: device identities, timestamped items,
//! the line-oriented wire codec, and item reconciliation.
//!
//! This crate contains no I/O, no sockets, no tasks. It is pure computation
//! over the values two peers exchange.
//!
//! ## Key Types
//!
//! - [`DeviceInfo`] - One endpoint of a session (name, address, port)
//! - [`ConnectionInfo`] - Both endpoints, only constructible once both are known
//! - [`SyncItem`] - An immutable timestamped text item
//! - [`ConnectionCode`] - The 6-digit code a client must present to a server
//! - [`Frame`] - One newline-delimited line on the data connection
//!
//! ## Reconciliation
//!
//! Item collections converge by merge-by-id and sort-by-timestamp. See the
//! [`reconcile`] module.

pub mod error;
pub mod message;
pub mod reconcile;
pub mod types;

pub use error::{Result, WireError};
pub use message::{Frame, SyncMessage};
pub use reconcile::{merge, sort_newest_first, ItemCollection};
pub use types::{
    ConnectionCode, ConnectionInfo, ConnectionState, DeviceInfo, SyncItem, VerificationResult,
};
