//! Test fixtures and helpers.
//!
//! Common setup code for end-to-end tests over loopback TCP. Helpers here
//! panic on timeout rather than returning errors so a hung session fails
//! the test instead of stalling it.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use duosync_core::{ConnectionState, Frame, SyncItem};
use duosync_session::transport::{self, LineStream};
use duosync_session::{ChannelListener, Engine, SessionConfig, SessionEvent};

/// How long helpers wait before declaring a test hung.
pub const WAIT: Duration = Duration::from_secs(5);

/// Loopback config with short deadlines.
pub fn test_config(name: &str) -> SessionConfig {
    SessionConfig::default()
        .with_device_name(name)
        .with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_timeouts(WAIT)
        .with_disconnect_grace(Duration::from_millis(500))
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Probe
// ─────────────────────────────────────────────────────────────────────────────

/// Reads listener events with a deadline.
pub struct EventProbe {
    rx: UnboundedReceiver<SessionEvent>,
}

impl EventProbe {
    pub fn new(rx: UnboundedReceiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// The next event.
    pub async fn next(&mut self) -> SessionEvent {
        match timeout(WAIT, self.rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => panic!("listener dropped"),
            Err(_) => panic!("no event within {:?}", WAIT),
        }
    }

    /// Skip events until one matches, and return it.
    pub async fn wait_for(&mut self, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        loop {
            let event = self.next().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Every event up to and including the first match.
    pub async fn until(&mut self, pred: impl Fn(&SessionEvent) -> bool) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next().await;
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    /// Wait for a failure report and return its reason.
    pub async fn failure(&mut self) -> String {
        match self
            .wait_for(|e| matches!(e, SessionEvent::ConnectionFailed(_)))
            .await
        {
            SessionEvent::ConnectionFailed(reason) => reason,
            _ => unreachable!(),
        }
    }

    /// Assert nothing arrives for `period`.
    pub async fn assert_quiet(&mut self, period: Duration) {
        if let Ok(Some(event)) = timeout(period, self.rx.recv()).await {
            panic!("unexpected event {:?}", event);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test Peer
// ─────────────────────────────────────────────────────────────────────────────

/// An engine on loopback with its event stream.
pub struct TestPeer {
    pub engine: Engine,
    pub events: EventProbe,
}

impl TestPeer {
    /// Create a peer named `name`.
    pub fn new(name: &str) -> Self {
        Self::with_config(test_config(name))
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let (listener, rx) = ChannelListener::new();
        Self {
            engine: Engine::new(config, Arc::new(listener)),
            events: EventProbe::new(rx),
        }
    }

    /// Seed the local collection.
    pub fn with_items(self, items: Vec<SyncItem>) -> Self {
        self.engine.set_items(items);
        self
    }

    /// Start hosting on a free port; returns the code and the port.
    pub fn host(&self) -> (String, u16) {
        let code = self.engine.start_server(0).unwrap();
        let port = self.engine.listen_port().unwrap();
        (code.as_str().to_string(), port)
    }

    /// Join a loopback server.
    pub fn join(&self, port: u16, code: &str) {
        self.engine.connect("127.0.0.1", port, code).unwrap();
    }

    /// Block until the engine reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) {
        wait_for_state(&self.engine, state).await;
    }
}

/// Block until `engine` reaches `state`.
pub async fn wait_for_state(engine: &Engine, state: ConnectionState) {
    let mut rx = engine.subscribe();
    let reached = timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .map(|changed| changed.is_ok());
    match reached {
        Ok(true) => {}
        Ok(false) => panic!("engine dropped"),
        Err(_) => panic!("engine stuck in {} waiting for {}", engine.state(), state),
    }
}

/// Host on `server`, join from `client`, and wait until both are connected
/// and have seen each other's identity.
pub async fn connect_pair(server: &mut TestPeer, client: &mut TestPeer) {
    let (code, port) = server.host();
    client.join(port, &code);

    for peer in [&mut *server, &mut *client] {
        peer.wait_for_state(ConnectionState::Connected).await;
        peer.events
            .wait_for(|e| matches!(e, SessionEvent::ConnectionInfoUpdated(Some(_))))
            .await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw Protocol Peer
// ─────────────────────────────────────────────────────────────────────────────

/// Speaks the line protocol by hand, for driving an engine with exact or
/// deliberately wrong frames.
pub struct RawPeer {
    pub conn: LineStream,
}

impl RawPeer {
    /// Present `code` on a fresh verification connection; returns the
    /// server's response line.
    pub async fn verify(port: u16, code: &str) -> String {
        let mut conn = Self::open(port).await;
        conn.send(code).await;
        let response = conn.recv().await.unwrap_or_default();
        conn.conn.close();
        response
    }

    /// Pass verification and open the data connection.
    pub async fn join(port: u16, code: &str) -> Self {
        let response = Self::verify(port, code).await;
        assert_eq!(response, duosync_core::message::VERIFICATION_SUCCESS);
        Self::open(port).await
    }

    /// Open a plain connection.
    pub async fn open(port: u16) -> Self {
        let config = test_config("raw");
        let conn = transport::connect("127.0.0.1", port, &config).await.unwrap();
        Self { conn }
    }

    pub async fn send(&mut self, line: &str) {
        self.conn.write_line(line).await.unwrap();
    }

    pub async fn send_frame(&mut self, frame: Frame) {
        let line = frame.encode().unwrap();
        self.send(&line).await;
    }

    /// The next line, or `None` at end of stream.
    pub async fn recv(&mut self) -> Option<String> {
        match timeout(WAIT, self.conn.read_line()).await {
            Ok(result) => result.unwrap(),
            Err(_) => panic!("no line within {:?}", WAIT),
        }
    }

    /// The next line, decoded.
    pub async fn recv_frame(&mut self) -> Frame {
        let line = self.recv().await.unwrap();
        Frame::decode(&line).unwrap()
    }
}
