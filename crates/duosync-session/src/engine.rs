//! Session state machine.
//!
//! One [`Engine`] owns at most one session at a time and drives it through
//!
//! ```text
//! Disconnected -> Verifying -> Connecting -> Connected -> Disconnected
//! ```
//!
//! Every attempt is stamped with an epoch. Background tasks carry the epoch
//! they were started for, and anything they try to do after that session
//! has been torn down is ignored.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use duosync_core::message::DISCONNECT_REQUEST;
use duosync_core::{
    ConnectionCode, ConnectionInfo, ConnectionState, DeviceInfo, Frame, ItemCollection, SyncItem,
    SyncMessage, VerificationResult,
};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::SessionListener;
use crate::handshake;
use crate::pump;
use crate::transport::{self, LineStream, LineWriter, TransportCloser};

/// Write half shared by the engine and its send tasks.
pub(crate) type SharedWriter = Arc<AsyncMutex<LineWriter>>;

/// Which side of the handshake this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Mutable session fields, guarded by one lock.
#[derive(Default)]
struct Session {
    state: ConnectionState,
    epoch: u64,
    role: Option<Role>,
    code: Option<ConnectionCode>,
    verified: bool,
    listen_port: Option<u16>,
    local: Option<DeviceInfo>,
    remote: Option<DeviceInfo>,
    writer: Option<SharedWriter>,
    closer: Option<TransportCloser>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: SessionConfig,
    listener: Arc<dyn SessionListener>,
    session: Mutex<Session>,
    items: Mutex<ItemCollection>,
    state_tx: watch::Sender<ConnectionState>,
}

/// The connection and session engine.
///
/// Cheap to clone; all clones drive the same session. Must be used from
/// within a Tokio runtime.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Create an idle engine reporting to `listener`.
    pub fn new(config: SessionConfig, listener: Arc<dyn SessionListener>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                listener,
                session: Mutex::new(Session::default()),
                items: Mutex::new(ItemCollection::new()),
                state_tx,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.session().state
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The role of the current session, if any.
    pub fn role(&self) -> Option<Role> {
        self.session().role
    }

    /// The code clients must present, while serving.
    pub fn connection_code(&self) -> Option<ConnectionCode> {
        self.session().code.clone()
    }

    /// The bound port of the listening endpoint, while serving.
    pub fn listen_port(&self) -> Option<u16> {
        self.session().listen_port
    }

    /// Both endpoints, once the peer has introduced itself.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        let session = self.session();
        match (&session.local, &session.remote) {
            (Some(local), Some(remote)) => Some(ConnectionInfo::new(local.clone(), remote.clone())),
            _ => None,
        }
    }

    /// Snapshot of the local collection, newest first.
    pub fn items(&self) -> Vec<SyncItem> {
        self.lock_items().to_vec()
    }

    /// Replace the local collection, deduplicating and sorting.
    pub fn set_items(&self, items: Vec<SyncItem>) {
        *self.lock_items() = ItemCollection::from_items(items);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entry Points
    // ─────────────────────────────────────────────────────────────────────────

    /// Listen on `port` (0 picks a free port) and wait for one client.
    ///
    /// Returns the freshly generated code the client must present. The
    /// listening endpoint accepts one verification attempt and, on success,
    /// one data connection; after that, or after any failure, it is closed.
    pub fn start_server(&self, port: u16) -> Result<ConnectionCode> {
        let mut session = self.session();
        if session.state != ConnectionState::Disconnected {
            return Err(SessionError::AlreadyActive(session.state));
        }

        let listener =
            transport::bind_listener(self.inner.config.bind_address, port).map_err(SessionError::Bind)?;
        let listen_port = listener.local_addr().map_err(SessionError::Bind)?.port();
        let code = ConnectionCode::generate();

        let epoch = self.begin(&mut session, Role::Server);
        session.code = Some(code.clone());
        session.listen_port = Some(listen_port);

        let engine = self.clone();
        let task_code = code.clone();
        session.tasks.push(tokio::spawn(async move {
            engine.run_server(epoch, listener, task_code).await;
        }));

        tracing::info!("listening on port {}", listen_port);
        Ok(code)
    }

    /// Connect to a server at `address:port` presenting `code`.
    ///
    /// Returns once the attempt has started; the outcome is reported
    /// through the listener.
    pub fn connect(&self, address: &str, port: u16, code: &str) -> Result<()> {
        let mut session = self.session();
        if session.state != ConnectionState::Disconnected {
            return Err(SessionError::AlreadyActive(session.state));
        }

        let epoch = self.begin(&mut session, Role::Client);
        tracing::info!("connecting to {}:{}", address, port);

        let engine = self.clone();
        let address = address.to_string();
        let code = code.to_string();
        session.tasks.push(tokio::spawn(async move {
            engine.run_client(epoch, address, port, code).await;
        }));
        Ok(())
    }

    /// End the session.
    ///
    /// When connected, asks the peer to acknowledge and waits up to the
    /// configured grace period before tearing down regardless. Returns once
    /// the engine is `Disconnected`. Calling it while already disconnected
    /// does nothing.
    pub async fn disconnect(&self) {
        let (state, epoch, writer) = {
            let session = self.session();
            (session.state, session.epoch, session.writer.clone())
        };

        match (state, writer) {
            (ConnectionState::Disconnected, _) => {
                tracing::debug!("disconnect requested while already disconnected");
                return;
            }
            (ConnectionState::Connected, Some(writer)) => {
                let mut state_rx = self.subscribe();
                // Both the write and the wait count against the grace period.
                let graceful = async {
                    writer.lock().await.write_line(DISCONNECT_REQUEST).await?;
                    let _ = state_rx
                        .wait_for(|s| *s == ConnectionState::Disconnected)
                        .await;
                    Ok::<(), std::io::Error>(())
                };
                match timeout(self.inner.config.disconnect_grace, graceful).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("failed to send disconnect request: {}", e),
                    Err(_) => tracing::debug!("no disconnect acknowledgement, forcing teardown"),
                }
            }
            _ => {}
        }

        self.close(Some(epoch));
    }

    /// Create an item, add it locally, and share it if connected.
    pub fn send_item(&self, text: impl Into<String>) -> SyncItem {
        let item = SyncItem::new(text);
        self.lock_items().insert(item.clone());

        if self.state() == ConnectionState::Connected {
            if let Err(e) = self.send(SyncMessage::ItemAdded(item.clone())) {
                tracing::debug!("item {} kept locally only: {}", item.id, e);
            }
        }
        item
    }

    /// Send a message to the peer on a background task.
    ///
    /// Fails with [`SessionError::NotConnected`] unless connected. Two sends
    /// issued back to back are not guaranteed to reach the peer in order.
    pub fn send(&self, message: SyncMessage) -> Result<()> {
        let line = Frame::Sync(message).encode()?;
        self.send_line(line)
    }

    fn send_line(&self, line: String) -> Result<()> {
        let mut session = self.session();
        if session.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let writer = session.writer.clone().ok_or(SessionError::NotConnected)?;
        let epoch = session.epoch;

        session.tasks.retain(|task| !task.is_finished());
        let engine = self.clone();
        session.tasks.push(tokio::spawn(async move {
            let result = writer.lock().await.write_line(&line).await;
            if let Err(e) = result {
                engine.fail(epoch, SessionError::Io(e));
            }
        }));
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handshake Workers
    // ─────────────────────────────────────────────────────────────────────────

    async fn run_server(self, epoch: u64, listener: TcpListener, code: ConnectionCode) {
        let outcome = self.serve(epoch, &listener, &code).await;
        drop(listener);

        match outcome {
            Ok(conn) => self.promote(epoch, conn).await,
            Err(e) => self.fail(epoch, e),
        }
    }

    async fn serve(
        &self,
        epoch: u64,
        listener: &TcpListener,
        code: &ConnectionCode,
    ) -> Result<LineStream> {
        let config = &self.inner.config;
        match handshake::serve_verification(listener, code, config).await? {
            VerificationResult::Success => self.mark_verified(epoch)?,
            VerificationResult::Failure { reason } => {
                return Err(SessionError::VerificationFailure(reason));
            }
        }
        handshake::accept_data_connection(listener, config).await
    }

    async fn run_client(self, epoch: u64, address: String, port: u16, code: String) {
        let config = &self.inner.config;
        let attempt = async {
            handshake::request_verification(&address, port, &code, config).await?;
            self.mark_verified(epoch)?;
            let conn = handshake::open_data_connection(&address, port, config).await?;
            Ok::<LineStream, SessionError>(conn)
        };

        match timeout(config.handshake_timeout, attempt).await {
            Ok(Ok(conn)) => self.promote(epoch, conn).await,
            Ok(Err(e)) => self.fail(epoch, e),
            Err(_) => self.fail(epoch, SessionError::Timeout("during handshake".into())),
        }
    }

    fn begin(&self, session: &mut Session, role: Role) -> u64 {
        session.epoch += 1;
        session.role = Some(role);
        self.set_state(session, ConnectionState::Verifying);
        session.epoch
    }

    /// `Verifying -> Connecting`, only for the live epoch.
    fn mark_verified(&self, epoch: u64) -> Result<()> {
        let mut session = self.session();
        if session.epoch != epoch || session.state != ConnectionState::Verifying {
            return Err(SessionError::Cancelled);
        }
        session.verified = true;
        self.set_state(&mut session, ConnectionState::Connecting);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Data Connection
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) async fn promote(&self, epoch: u64, conn: LineStream) {
        if let Err(e) = self.try_promote(epoch, conn).await {
            self.fail(epoch, e);
        }
    }

    /// Turn a verified connection into the session's data transport:
    /// announce our identity, go `Connected`, start the pump, and as the
    /// client kick off reconciliation.
    async fn try_promote(&self, epoch: u64, conn: LineStream) -> Result<()> {
        let addr = conn.local_addr();
        let local = DeviceInfo::new(
            self.inner.config.device_name.clone(),
            addr.ip().to_string(),
            addr.port(),
        );
        let (reader, writer, closer) = conn.into_parts();
        let writer: SharedWriter = Arc::new(AsyncMutex::new(writer));

        {
            let mut session = self.session();
            if session.epoch != epoch {
                closer.close();
                return Err(SessionError::Cancelled);
            }
            if !session.verified || session.state != ConnectionState::Connecting {
                closer.close();
                return Err(SessionError::ProtocolViolation(
                    "data transport promoted before verification completed".into(),
                ));
            }
            session.local = Some(local.clone());
            session.writer = Some(Arc::clone(&writer));
            session.closer = Some(closer);
        }

        let announce = Frame::DeviceInfo(local).encode()?;
        writer.lock().await.write_line(&announce).await?;

        let role = {
            let mut session = self.session();
            if session.epoch != epoch || session.state != ConnectionState::Connecting {
                return Err(SessionError::Cancelled);
            }
            self.set_state(&mut session, ConnectionState::Connected);
            session.role
        };
        tracing::info!("session connected as {:?}", role);
        self.inner.listener.on_connection_established();

        {
            let mut session = self.session();
            if session.epoch != epoch || session.state != ConnectionState::Connected {
                return Err(SessionError::Cancelled);
            }
            let engine = self.clone();
            session
                .tasks
                .push(tokio::spawn(pump::run(engine, epoch, reader)));
        }

        if role == Some(Role::Client) {
            self.send(SyncMessage::SyncRequest(self.items()))?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pump Support
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn listener(&self) -> &dyn SessionListener {
        self.inner.listener.as_ref()
    }

    /// The data writer, if `epoch` is still the live session.
    pub(crate) fn writer_for(&self, epoch: u64) -> Option<SharedWriter> {
        let session = self.session();
        if session.epoch == epoch && session.state != ConnectionState::Disconnected {
            session.writer.clone()
        } else {
            None
        }
    }

    /// Store the peer's identity; returns the full pair if ours is known.
    pub(crate) fn record_remote(&self, epoch: u64, remote: DeviceInfo) -> Option<ConnectionInfo> {
        let mut session = self.session();
        if session.epoch != epoch || session.state == ConnectionState::Disconnected {
            return None;
        }
        session.remote = Some(remote.clone());
        session
            .local
            .clone()
            .map(|local| ConnectionInfo::new(local, remote))
    }

    pub(crate) fn merge_remote_items(&self, remote: &[SyncItem]) -> Vec<SyncItem> {
        self.lock_items().merge_remote(remote)
    }

    pub(crate) fn adopt_items(&self, items: Vec<SyncItem>) {
        self.lock_items().replace(items);
    }

    pub(crate) fn add_remote_item(&self, item: SyncItem) -> bool {
        self.lock_items().insert(item)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Report a failure once and tear down.
    ///
    /// Ignored if `epoch` is no longer the live session.
    pub(crate) fn fail(&self, epoch: u64, error: SessionError) {
        if !self.teardown(Some(epoch)) {
            tracing::debug!("ignoring failure from finished session: {}", error);
            return;
        }
        tracing::warn!("session failed: {}", error);
        self.inner.listener.on_connection_failed(&error.to_string());
        self.inner.listener.on_connection_info_updated(None);
    }

    /// Tear down without reporting a failure.
    pub(crate) fn close(&self, epoch: Option<u64>) {
        if self.teardown(epoch) {
            self.inner.listener.on_connection_info_updated(None);
        }
    }

    /// Cancel tasks, release transports, reset session fields, and settle
    /// in `Disconnected`.
    ///
    /// Returns false if there was nothing to tear down.
    fn teardown(&self, epoch: Option<u64>) -> bool {
        let (tasks, writer, closer) = {
            let mut session = self.session();
            if session.state == ConnectionState::Disconnected {
                return false;
            }
            if epoch.is_some_and(|e| e != session.epoch) {
                return false;
            }

            let released = (
                mem::take(&mut session.tasks),
                session.writer.take(),
                session.closer.take(),
            );
            session.role = None;
            session.code = None;
            session.verified = false;
            session.listen_port = None;
            session.local = None;
            session.remote = None;
            self.set_state(&mut session, ConnectionState::Disconnected);
            released
        };

        for task in tasks {
            task.abort();
        }
        if let Some(closer) = closer {
            closer.close();
        }
        drop(writer);

        tracing::info!("session torn down");
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn set_state(&self, session: &mut Session, state: ConnectionState) {
        session.state = state;
        self.inner.state_tx.send_replace(state);
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_items(&self) -> MutexGuard<'_, ItemCollection> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
