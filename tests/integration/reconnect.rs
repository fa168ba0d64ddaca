// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

//! Integration tests for the reconnect state machine.
//!
//! Runs the channel manager on the loopback transport with tokio's clock
//! paused, so the fixed reconnect delay can be observed exactly:
//! - an abnormal close moves to `ClosedRetrying` at once and back to
//!   `Connecting` only once the delay has elapsed
//! - refused connection attempts are retried indefinitely
//! - teardown cancels a pending retry and is idempotent
//! - dropping the manager closes the socket

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use url::Url;

use livechat::channel::{ChannelConfig, ChannelManager, ConnectionState};
use livechat::transport::TransportError;
use livechat::transport::loopback::{LoopbackConnector, LoopbackServer};
use livechat_proto::room::{AuthToken, RoomId};

const DELAY: Duration = Duration::from_secs(3);

// =============================================================================
// Helpers
// =============================================================================

fn setup() -> (ChannelManager<LoopbackConnector>, LoopbackServer) {
    let (connector, server) = LoopbackConnector::pair();
    let config = ChannelConfig::new(Url::parse("ws://loopback/ws/chat/").unwrap());
    (ChannelManager::new(connector, config), server)
}

fn join(mgr: &ChannelManager<LoopbackConnector>) {
    mgr.join(RoomId::parse("42").unwrap(), AuthToken::parse("abc").unwrap());
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target}"))
        .expect("state channel closed");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn abnormal_close_retries_after_fixed_delay() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    join(&mgr);

    let peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    let dropped_at = Instant::now();
    peer.disconnect();
    wait_for_state(&mut state, ConnectionState::ClosedRetrying).await;
    assert!(dropped_at.elapsed() < DELAY, "retrying state must be immediate");
    assert!(!mgr.is_connected());

    // Not before the delay...
    tokio::time::advance(DELAY - Duration::from_millis(10)).await;
    assert_eq!(mgr.state(), ConnectionState::ClosedRetrying);
    assert!(server.try_next_connection().is_none());

    // ...but right after it.
    let pending = server.next_connection().await.unwrap();
    assert!(dropped_at.elapsed() >= DELAY);
    assert_eq!(mgr.state(), ConnectionState::Connecting);

    drop(pending.accept());
}

#[tokio::test(start_paused = true)]
async fn transport_error_is_an_abnormal_close() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    join(&mgr);

    let peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;
    peer.fail(TransportError::WebSocket("reset by peer".into()));

    wait_for_state(&mut state, ConnectionState::ClosedRetrying).await;
    let _peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;
}

#[tokio::test(start_paused = true)]
async fn refused_connections_retry_indefinitely() {
    let (mgr, mut server) = setup();
    join(&mgr);

    let mut last = Instant::now();
    server.next_connection().await.unwrap().refuse();
    for _ in 0..5 {
        let pending = server.next_connection().await.unwrap();
        let now = Instant::now();
        assert!(now - last >= DELAY, "attempts must be spaced by the delay");
        last = now;
        pending.refuse();
    }

    let _peer = server.accept().await.unwrap();
    let mut state = mgr.subscribe_state();
    wait_for_state(&mut state, ConnectionState::Open).await;
}

#[tokio::test(start_paused = true)]
async fn reconnected_session_keeps_receiving() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    let mut feed = mgr.subscribe_messages();
    join(&mgr);

    let peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;
    peer.push(r#"{"type":"chat_message","message":{"content":"before","sender_id":1}}"#);
    feed.wait_for(|m| m.len() == 1).await.unwrap();
    peer.disconnect();

    let peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;
    peer.push(r#"{"type":"chat_message","message":{"content":"after","sender_id":1}}"#);
    feed.wait_for(|m| m.len() == 2).await.unwrap();

    let contents: Vec<_> = mgr.messages().iter().map(|m| m.content.clone()).collect();
    assert_eq!(contents, ["before", "after"]);
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_pending_retry() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    join(&mgr);

    let peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;
    peer.disconnect();
    wait_for_state(&mut state, ConnectionState::ClosedRetrying).await;

    assert!(mgr.teardown());
    assert_eq!(mgr.state(), ConnectionState::ClosedClean);

    tokio::time::advance(DELAY * 10).await;
    assert!(server.try_next_connection().is_none());
    assert_eq!(mgr.state(), ConnectionState::ClosedClean);

    // Once the session task is gone only the manager holds the connector.
    drop(mgr);
    assert!(server.next_connection().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn teardown_is_idempotent() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    join(&mgr);

    let peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    assert!(mgr.teardown());
    assert!(!mgr.teardown());
    assert_eq!(mgr.state(), ConnectionState::ClosedClean);
    assert!(mgr.room().is_none());

    peer.closed().await;
    tokio::time::advance(DELAY * 10).await;
    assert!(server.try_next_connection().is_none());
}

#[tokio::test(start_paused = true)]
async fn teardown_during_connect_never_opens() {
    let (mgr, mut server) = setup();
    join(&mgr);

    let pending = server.next_connection().await.unwrap();
    assert_eq!(mgr.state(), ConnectionState::Connecting);
    assert!(mgr.teardown());

    // The attempt is abandoned; accepting it afterwards has no effect.
    let peer = pending.accept();
    peer.closed().await;
    tokio::time::advance(DELAY * 10).await;
    assert_eq!(mgr.state(), ConnectionState::ClosedClean);
    assert!(server.try_next_connection().is_none());
}

#[tokio::test(start_paused = true)]
async fn dropping_manager_closes_socket() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    join(&mgr);

    let peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    drop(mgr);
    peer.closed().await;
    assert!(server.next_connection().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn custom_delay_is_honoured() {
    let (connector, mut server) = LoopbackConnector::pair();
    let config = ChannelConfig::new(Url::parse("ws://loopback/ws/chat/").unwrap())
        .with_reconnect_delay(Duration::from_millis(250));
    let mgr = ChannelManager::new(connector, config);
    join(&mgr);

    server.next_connection().await.unwrap().refuse();
    let refused_at = Instant::now();
    let _pending = server.next_connection().await.unwrap();
    let waited = refused_at.elapsed();
    assert!(waited >= Duration::from_millis(250));
    assert!(waited < DELAY);
}
