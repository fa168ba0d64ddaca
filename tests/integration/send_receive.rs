// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

//! Integration tests for sending and receiving through the channel manager.
//!
//! Exercises the full path over the loopback transport: endpoint
//! construction, inbound frame decoding and normalization, outbound
//! envelopes, malformed frame resilience, and sends while disconnected.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::watch;
use url::Url;

use livechat::channel::{
    ChannelConfig, ChannelManager, ConnectionState, DEFAULT_BASE_URL, SendStatus, Snapshot,
};
use livechat::transport::loopback::{LoopbackConnector, LoopbackServer};
use livechat_proto::message::{MessageKind, OutgoingMessage, SenderId};
use livechat_proto::room::{AuthToken, RoomId};

// =============================================================================
// Helpers
// =============================================================================

fn setup() -> (ChannelManager<LoopbackConnector>, LoopbackServer) {
    let (connector, server) = LoopbackConnector::pair();
    let config = ChannelConfig::new(Url::parse(DEFAULT_BASE_URL).unwrap());
    (ChannelManager::new(connector, config), server)
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == target))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

async fn wait_for_len(rx: &mut watch::Receiver<Snapshot>, len: usize) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|m| m.len() == len))
        .await
        .expect("timed out waiting for feed")
        .expect("feed channel closed");
}

fn parse(frame: &str) -> Value {
    serde_json::from_str(frame).unwrap()
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test(start_paused = true)]
async fn end_to_end_session() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    let mut feed = mgr.subscribe_messages();

    mgr.set_identity(RoomId::parse("42"), AuthToken::parse("abc"));
    mgr.set_history(Vec::new());
    assert_eq!(mgr.state(), ConnectionState::Connecting);

    let mut peer = server.accept().await.unwrap();
    assert_eq!(
        peer.endpoint().url().as_str(),
        "ws://127.0.0.1:8000/ws/chat/42/?token=abc"
    );
    wait_for_state(&mut state, ConnectionState::Open).await;
    assert!(mgr.is_connected());

    peer.push(
        r#"{"type":"chat_message","message":{"content":"hi","senderId":1,"timestamp":"2024-01-01T00:00:00Z"}}"#,
    );
    wait_for_len(&mut feed, 1).await;
    let messages = mgr.messages();
    assert_eq!(messages[0].content, "hi");
    assert_eq!(messages[0].sender_id, Some(SenderId::new("1")));
    assert_eq!(messages[0].kind, MessageKind::Chat);
    assert_eq!(messages[0].timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");

    assert_eq!(mgr.send(&json!({"content": "yo"})), SendStatus::Sent);
    let outbound = peer.next_outbound().await.unwrap();
    assert_eq!(
        parse(&outbound),
        json!({"type": "chat_message", "message": {"content": "yo"}})
    );
    // Sends are not echoed locally.
    assert_eq!(mgr.messages().len(), 1);

    peer.disconnect();
    wait_for_state(&mut state, ConnectionState::ClosedRetrying).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    wait_for_state(&mut state, ConnectionState::Connecting).await;
}

// =============================================================================
// Inbound
// =============================================================================

#[tokio::test]
async fn inbound_frame_shapes_are_normalized() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    let mut feed = mgr.subscribe_messages();
    mgr.join(RoomId::parse("42").unwrap(), AuthToken::parse("abc").unwrap());
    let peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    // Python-literal body inside a chat_message envelope.
    peer.push(
        json!({
            "type": "chat_message",
            "message": {"content": "{'content': 'hi there', 'sender_id': 5, 'sender_name': None}"}
        })
        .to_string(),
    );
    // Nested payload without a known type.
    peer.push(json!({"message": {"message": "nested", "sender_id": 6}}).to_string());
    // Bare record.
    peer.push(json!({"content": "bare", "sender_name": "carol"}).to_string());
    // System narration.
    peer.push(json!({"content": "alice added bob to the group"}).to_string());
    wait_for_len(&mut feed, 4).await;

    let messages = mgr.messages();
    assert_eq!(messages[0].sender_id, Some(SenderId::new("5")));
    assert_eq!(messages[1].content, "nested");
    assert_eq!(messages[2].sender_name.as_deref(), Some("carol"));
    assert_eq!(messages[3].kind, MessageKind::System);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_do_not_disturb_session() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    let mut feed = mgr.subscribe_messages();
    mgr.join(RoomId::parse("42").unwrap(), AuthToken::parse("abc").unwrap());
    let peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;
    state.borrow_and_update();

    peer.push("this is not json {");
    peer.push("");
    peer.push(json!({"type": "typing", "user": 3}).to_string());
    peer.push(json!({"type": "chat_message", "message": {"content": "ok"}}).to_string());
    wait_for_len(&mut feed, 1).await;

    assert_eq!(mgr.messages()[0].content, "ok");
    assert_eq!(mgr.state(), ConnectionState::Open);
    assert!(!state.has_changed().unwrap());
    assert!(!peer.is_closed());
}

// =============================================================================
// Outbound
// =============================================================================

#[tokio::test]
async fn send_while_disconnected_is_noop() {
    let (mgr, mut server) = setup();

    // Inert: no identity yet.
    assert_eq!(mgr.send_text("nobody home"), SendStatus::NotConnected);

    // Connecting: attempt not yet answered.
    mgr.join(RoomId::parse("42").unwrap(), AuthToken::parse("abc").unwrap());
    let pending = server.next_connection().await.unwrap();
    assert_eq!(mgr.send_text("too early"), SendStatus::NotConnected);
    assert!(mgr.messages().is_empty());

    // Sends refused while connecting are never delivered later.
    let mut peer = pending.accept();
    let mut state = mgr.subscribe_state();
    wait_for_state(&mut state, ConnectionState::Open).await;
    assert!(mgr.send_text("now").is_sent());
    let frame = parse(&peer.next_outbound().await.unwrap());
    assert_eq!(frame["message"]["content"], "now");
    assert!(peer.try_next_outbound().is_none());
}

#[tokio::test]
async fn send_after_teardown_is_noop() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    mgr.join(RoomId::parse("42").unwrap(), AuthToken::parse("abc").unwrap());
    let _peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    mgr.teardown();
    assert_eq!(mgr.send_text("late"), SendStatus::NotConnected);
}

#[tokio::test]
async fn outgoing_message_carries_client_fields() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    mgr.join(RoomId::parse("42").unwrap(), AuthToken::parse("abc").unwrap());
    let mut peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    let message = OutgoingMessage::new("hello")
        .with_sender(SenderId::new("7"), Some("alice".into()))
        .with_group(&RoomId::parse("42").unwrap());
    assert!(mgr.send(&message).is_sent());

    let frame = parse(&peer.next_outbound().await.unwrap());
    assert_eq!(frame["type"], "chat_message");
    let body = &frame["message"];
    assert_eq!(body["content"], "hello");
    assert_eq!(body["sender_id"], 7);
    assert_eq!(body["sender_name"], "alice");
    assert_eq!(body["group_id"], "42");
    assert!(body["id"].as_str().unwrap().starts_with("temp-"));
    assert!(body.get("sender_avatar").is_none());
}

#[tokio::test]
async fn failed_write_counts_as_abnormal_close() {
    let (mgr, mut server) = setup();
    let mut state = mgr.subscribe_state();
    mgr.join(RoomId::parse("42").unwrap(), AuthToken::parse("abc").unwrap());
    let peer = server.accept().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Open).await;

    // The server stops reading, so the next write fails.
    let mut peer = peer;
    peer.stop_reading();
    assert!(mgr.send_text("into the void").is_sent());
    wait_for_state(&mut state, ConnectionState::ClosedRetrying).await;
}
