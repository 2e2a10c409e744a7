//! Listener interface the engine reports to.
//!
//! The engine calls a [`SessionListener`] from its own tasks, never while
//! holding internal locks, so implementations may call back into the engine.

use tokio::sync::mpsc;

use duosync_core::{ConnectionInfo, SyncItem};

/// Callbacks for session lifecycle and inbound application messages.
///
/// Every method has a no-op default.
pub trait SessionListener: Send + Sync {
    /// The data connection is up and the message pump is running.
    fn on_connection_established(&self) {}

    /// A connection attempt or live session failed. Reported once, after
    /// the engine has already returned to `Disconnected`.
    fn on_connection_failed(&self, _reason: &str) {}

    /// Both endpoints are known (`Some`), or the session ended (`None`).
    fn on_connection_info_updated(&self, _info: Option<&ConnectionInfo>) {}

    /// The peer sent its collection for merging.
    fn on_sync_request_received(&self, _items: &[SyncItem]) {}

    /// The peer sent the merged collection, now adopted locally.
    fn on_sync_response_received(&self, _items: &[SyncItem]) {}

    /// The peer created an item.
    fn on_item_added(&self, _item: &SyncItem) {}

    /// A line matching no known frame.
    fn on_message_received(&self, _line: &str) {}
}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl SessionListener for NoopListener {}

/// Listener callbacks as values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectionEstablished,
    ConnectionFailed(String),
    ConnectionInfoUpdated(Option<ConnectionInfo>),
    SyncRequestReceived(Vec<SyncItem>),
    SyncResponseReceived(Vec<SyncItem>),
    ItemAdded(SyncItem),
    MessageReceived(String),
}

/// Listener that forwards every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its event stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SessionEvent) {
        // Receiver gone means nobody is interested any more.
        let _ = self.tx.send(event);
    }
}

impl SessionListener for ChannelListener {
    fn on_connection_established(&self) {
        self.emit(SessionEvent::ConnectionEstablished);
    }

    fn on_connection_failed(&self, reason: &str) {
        self.emit(SessionEvent::ConnectionFailed(reason.to_string()));
    }

    fn on_connection_info_updated(&self, info: Option<&ConnectionInfo>) {
        self.emit(SessionEvent::ConnectionInfoUpdated(info.cloned()));
    }

    fn on_sync_request_received(&self, items: &[SyncItem]) {
        self.emit(SessionEvent::SyncRequestReceived(items.to_vec()));
    }

    fn on_sync_response_received(&self, items: &[SyncItem]) {
        self.emit(SessionEvent::SyncResponseReceived(items.to_vec()));
    }

    fn on_item_added(&self, item: &SyncItem) {
        self.emit(SessionEvent::ItemAdded(item.clone()));
    }

    fn on_message_received(&self, line: &str) {
        self.emit(SessionEvent::MessageReceived(line.to_string()));
    }
}
