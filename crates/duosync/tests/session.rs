//! End-to-end session tests over loopback TCP.
//!
//! Each test drives real engines (or a hand-written protocol peer) through
//! the full handshake and checks what both sides observe.

use std::time::Duration;

use duosync::core::message::{
    DEVICE_INFO_PREFIX, DISCONNECT_ACKNOWLEDGE, DISCONNECT_REQUEST, VERIFICATION_SUCCESS,
};
use duosync::core::Frame;
use duosync::session::handshake::INVALID_CODE_REASON;
use duosync::{ConnectionState, SessionError, SessionEvent, SyncItem, SyncMessage};
use duosync_testkit::fixtures::{test_config, TestPeer};
use duosync_testkit::{connect_pair, init_tracing, wait_for_state, RawPeer};

fn item(id: &str, text: &str, ts: i64) -> SyncItem {
    SyncItem::with_id(id, text, ts)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_correct_code_connects_both_sides() {
    init_tracing();
    let mut server = TestPeer::new("server-dev");
    let mut client = TestPeer::new("client-dev");

    let (code, port) = server.host();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
    client.join(port, &code);

    server.wait_for_state(ConnectionState::Connected).await;
    client.wait_for_state(ConnectionState::Connected).await;

    let server_info = match server
        .events
        .wait_for(|e| matches!(e, SessionEvent::ConnectionInfoUpdated(Some(_))))
        .await
    {
        SessionEvent::ConnectionInfoUpdated(Some(info)) => info,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(server_info.local.name, "server-dev");
    assert_eq!(server_info.remote.name, "client-dev");
    assert_eq!(server_info.local.port, port);

    let client_info = match client
        .events
        .wait_for(|e| matches!(e, SessionEvent::ConnectionInfoUpdated(Some(_))))
        .await
    {
        SessionEvent::ConnectionInfoUpdated(Some(info)) => info,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(client_info.remote.name, "server-dev");
    assert_eq!(client_info.remote.port, port);
    assert_eq!(client.engine.connection_info(), Some(client_info));

    client.engine.disconnect().await;
    server.engine.disconnect().await;
}

#[tokio::test]
async fn test_wrong_code_fails_both_sides() {
    init_tracing();
    let mut server = TestPeer::new("server");
    let mut client = TestPeer::new("client");

    let (code, port) = server.host();
    let wrong = if code == "000000" { "000001" } else { "000000" };
    client.join(port, wrong);

    let reason = client.events.failure().await;
    assert_eq!(reason, format!("Verification failed: {INVALID_CODE_REASON}"));
    client.wait_for_state(ConnectionState::Disconnected).await;

    let reason = server.events.failure().await;
    assert!(reason.contains(INVALID_CODE_REASON), "{reason}");
    server.wait_for_state(ConnectionState::Disconnected).await;
    assert_eq!(server.engine.connection_code(), None);
}

#[tokio::test]
async fn test_failure_reported_once_then_info_cleared() {
    let server = TestPeer::new("server");
    let mut client = TestPeer::new("client");

    let (_, port) = server.host();
    client.join(port, "999999x");

    let seen = client
        .events
        .until(|e| matches!(e, SessionEvent::ConnectionInfoUpdated(None)))
        .await;
    let failures = seen
        .iter()
        .filter(|e| matches!(e, SessionEvent::ConnectionFailed(_)))
        .count();
    assert_eq!(failures, 1);
    assert!(matches!(seen[0], SessionEvent::ConnectionFailed(_)));
    client.events.assert_quiet(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_raw_wire_verification() {
    let server = TestPeer::new("server");
    let (_, port) = server.host();

    let response = RawPeer::verify(port, "123").await;
    assert_eq!(response, format!("VERIFICATION_FAILED:{INVALID_CODE_REASON}"));
    wait_for_state(&server.engine, ConnectionState::Disconnected).await;

    // The endpoint is single-shot; a fresh attempt needs a fresh code.
    let (fresh, port) = server.host();
    let response = RawPeer::verify(port, &fresh).await;
    assert_eq!(response, VERIFICATION_SUCCESS);
    server.engine.disconnect().await;
}

#[tokio::test]
async fn test_accept_timeout_reported() {
    let config = test_config("lonely").with_timeouts(Duration::from_millis(200));
    let mut server = TestPeer::with_config(config);

    server.host();

    let reason = server.events.failure().await;
    assert!(reason.starts_with("timed out"), "{reason}");
    server.wait_for_state(ConnectionState::Disconnected).await;
    assert_eq!(server.engine.listen_port(), None);
}

#[tokio::test]
async fn test_client_handshake_timeout_reported() {
    let config = test_config("client").with_timeouts(Duration::from_millis(300));
    let mut client = TestPeer::with_config(config);
    let server = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();

    // Accepts the verification connection and never answers.
    let silent = tokio::spawn(async move {
        let (stream, _) = server.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    client.join(port, "123456");

    let seen = client
        .events
        .until(|e| matches!(e, SessionEvent::ConnectionInfoUpdated(None)))
        .await;
    match &seen[..] {
        [SessionEvent::ConnectionFailed(reason), SessionEvent::ConnectionInfoUpdated(None)] => {
            assert!(reason.starts_with("timed out"), "{reason}");
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert_eq!(client.engine.state(), ConnectionState::Disconnected);

    silent.abort();
}

#[tokio::test]
async fn test_connect_to_closed_port_reported() {
    let mut client = TestPeer::new("client");
    // Grab a free port, then release it.
    let port = {
        let probe = TestPeer::new("probe");
        let (_, port) = probe.host();
        probe.engine.disconnect().await;
        port
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.join(port, "123456");

    let reason = client.events.failure().await;
    assert!(reason.starts_with("transport error"), "{reason}");
    client.wait_for_state(ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn test_second_attempt_rejected_while_active() {
    let mut server = TestPeer::new("server");
    let mut client = TestPeer::new("client");
    connect_pair(&mut server, &mut client).await;

    assert!(matches!(
        server.engine.start_server(0),
        Err(SessionError::AlreadyActive(ConnectionState::Connected))
    ));
    assert!(matches!(
        client.engine.connect("127.0.0.1", 1, "123456"),
        Err(SessionError::AlreadyActive(ConnectionState::Connected))
    ));

    // The live session is untouched.
    assert_eq!(server.engine.state(), ConnectionState::Connected);
    assert_eq!(client.engine.state(), ConnectionState::Connected);

    client.engine.disconnect().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciliation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_initial_sync_merges_both_collections() {
    init_tracing();
    let a = item("a", "from server", 100);
    let b = item("b", "from client", 200);
    let mut server = TestPeer::new("server").with_items(vec![a.clone()]);
    let mut client = TestPeer::new("client").with_items(vec![b.clone()]);

    let (code, port) = server.host();
    client.join(port, &code);

    let request = server
        .events
        .wait_for(|e| matches!(e, SessionEvent::SyncRequestReceived(_)))
        .await;
    assert_eq!(request, SessionEvent::SyncRequestReceived(vec![b.clone()]));

    let response = client
        .events
        .wait_for(|e| matches!(e, SessionEvent::SyncResponseReceived(_)))
        .await;
    let expected = vec![b, a];
    assert_eq!(response, SessionEvent::SyncResponseReceived(expected.clone()));

    assert_eq!(server.engine.items(), expected);
    assert_eq!(client.engine.items(), expected);

    client.engine.disconnect().await;
}

#[tokio::test]
async fn test_shared_items_not_duplicated() {
    let shared = item("s", "both", 300);
    let server = TestPeer::new("server").with_items(vec![shared.clone(), item("x", "x", 50)]);
    let mut client = TestPeer::new("client").with_items(vec![shared.clone()]);

    let (code, port) = server.host();
    client.join(port, &code);
    client
        .events
        .wait_for(|e| matches!(e, SessionEvent::SyncResponseReceived(_)))
        .await;

    let items = client.engine.items();
    assert_eq!(items, vec![shared, item("x", "x", 50)]);
    assert_eq!(server.engine.items(), items);

    client.engine.disconnect().await;
}

#[tokio::test]
async fn test_new_items_reach_peer() {
    let mut server = TestPeer::new("server");
    let mut client = TestPeer::new("client");
    connect_pair(&mut server, &mut client).await;
    client
        .events
        .wait_for(|e| matches!(e, SessionEvent::SyncResponseReceived(_)))
        .await;

    let created = server.engine.send_item("hello from server");

    let received = client
        .events
        .wait_for(|e| matches!(e, SessionEvent::ItemAdded(_)))
        .await;
    assert_eq!(received, SessionEvent::ItemAdded(created.clone()));
    assert!(client.engine.items().contains(&created));

    let reply = client.engine.send_item("hello back");
    let received = server
        .events
        .wait_for(|e| matches!(e, SessionEvent::ItemAdded(_)))
        .await;
    assert_eq!(received, SessionEvent::ItemAdded(reply));
    assert_eq!(server.engine.items().len(), 2);

    client.engine.disconnect().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Behaviour
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_device_info_precedes_sync_traffic() {
    let server = TestPeer::new("server").with_items(vec![item("a", "one", 1)]);
    let (code, port) = server.host();
    let mut raw = RawPeer::join(port, &code).await;

    let first = raw.recv().await.unwrap();
    assert!(first.starts_with(DEVICE_INFO_PREFIX), "{first}");
    assert!(first.starts_with("DEVICE_INFO:server|127.0.0.1|"), "{first}");

    raw.send_frame(Frame::Sync(SyncMessage::SyncRequest(vec![item("b", "two", 2)])))
        .await;
    assert_eq!(
        raw.recv_frame().await,
        Frame::Sync(SyncMessage::SyncResponse(vec![
            item("b", "two", 2),
            item("a", "one", 1)
        ]))
    );

    server.engine.disconnect().await;
}

#[tokio::test]
async fn test_malformed_frames_are_not_fatal() {
    let mut server = TestPeer::new("server");
    let (code, port) = server.host();
    let mut raw = RawPeer::join(port, &code).await;
    raw.recv().await.unwrap();

    raw.send("SYNC_REQUEST:{broken").await;
    raw.send("ITEM_ADDED:[]").await;
    raw.send("DEVICE_INFO:no-fields").await;
    raw.send("just some text").await;
    raw.send_frame(Frame::Sync(SyncMessage::ItemAdded(item("ok", "fine", 9))))
        .await;

    assert_eq!(
        server
            .events
            .wait_for(|e| matches!(e, SessionEvent::MessageReceived(_)))
            .await,
        SessionEvent::MessageReceived("just some text".into())
    );
    assert_eq!(
        server
            .events
            .wait_for(|e| matches!(e, SessionEvent::ItemAdded(_)))
            .await,
        SessionEvent::ItemAdded(item("ok", "fine", 9))
    );
    assert_eq!(server.engine.state(), ConnectionState::Connected);

    server.engine.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_request_is_acknowledged() {
    let mut server = TestPeer::new("server");
    let (code, port) = server.host();
    let mut raw = RawPeer::join(port, &code).await;
    raw.recv().await.unwrap();
    wait_for_state(&server.engine, ConnectionState::Connected).await;

    raw.send(DISCONNECT_REQUEST).await;

    assert_eq!(raw.recv().await.as_deref(), Some(DISCONNECT_ACKNOWLEDGE));
    server.wait_for_state(ConnectionState::Disconnected).await;
    let seen = server
        .events
        .until(|e| matches!(e, SessionEvent::ConnectionInfoUpdated(None)))
        .await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectionFailed(_))));
}

// ─────────────────────────────────────────────────────────────────────────────
// Teardown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_twice_is_clean() {
    init_tracing();
    let mut server = TestPeer::new("server");
    let mut client = TestPeer::new("client");
    connect_pair(&mut server, &mut client).await;

    client.engine.disconnect().await;
    client.engine.disconnect().await;

    assert_eq!(client.engine.state(), ConnectionState::Disconnected);
    assert_eq!(client.engine.connection_info(), None);
    server.wait_for_state(ConnectionState::Disconnected).await;

    for peer in [&mut server, &mut client] {
        let seen = peer
            .events
            .until(|e| matches!(e, SessionEvent::ConnectionInfoUpdated(None)))
            .await;
        assert!(!seen
            .iter()
            .any(|e| matches!(e, SessionEvent::ConnectionFailed(_))));
        peer.events.assert_quiet(Duration::from_millis(200)).await;
    }
}

#[tokio::test]
async fn test_disconnect_without_acknowledgement_still_completes() {
    let mut client = TestPeer::new("client");
    let server = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();

    // A server that verifies anything and then never answers.
    let silent = tokio::spawn(async move {
        let (verify, _) = server.accept().await.unwrap();
        let mut verify = duosync::session::LineStream::new(verify, &test_config("x")).unwrap();
        verify.read_line().await.unwrap();
        verify.write_line(VERIFICATION_SUCCESS).await.unwrap();
        let (data, _) = server.accept().await.unwrap();
        let mut data = duosync::session::LineStream::new(data, &test_config("x")).unwrap();
        while let Ok(Some(_)) = data.read_line().await {}
    });

    client.join(port, "123456");
    client.wait_for_state(ConnectionState::Connected).await;

    tokio::time::timeout(Duration::from_secs(3), client.engine.disconnect())
        .await
        .unwrap();
    assert_eq!(client.engine.state(), ConnectionState::Disconnected);
    let seen = client
        .events
        .until(|e| matches!(e, SessionEvent::ConnectionInfoUpdated(None)))
        .await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectionFailed(_))));

    let _ = tokio::time::timeout(Duration::from_secs(1), silent).await;
}

#[tokio::test]
async fn test_peer_close_reported_as_failure() {
    let mut server = TestPeer::new("server");
    let (code, port) = server.host();
    let mut raw = RawPeer::join(port, &code).await;
    raw.recv().await.unwrap();
    wait_for_state(&server.engine, ConnectionState::Connected).await;

    drop(raw);

    let reason = server.events.failure().await;
    assert_eq!(reason, "peer closed the connection");
    server.wait_for_state(ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn test_engine_reusable_after_session() {
    let mut server = TestPeer::new("server");
    let mut client = TestPeer::new("client");

    connect_pair(&mut server, &mut client).await;
    client.engine.disconnect().await;
    server.wait_for_state(ConnectionState::Disconnected).await;

    connect_pair(&mut server, &mut client).await;
    assert_eq!(server.engine.state(), ConnectionState::Connected);
    server.engine.disconnect().await;
    client.wait_for_state(ConnectionState::Disconnected).await;
}
