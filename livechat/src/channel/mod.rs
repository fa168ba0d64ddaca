//! Live chat channel manager.
//!
//! [`ChannelManager`] owns at most one room session at a time. A session
//! keeps a realtime socket open for one `(RoomId, AuthToken)` pair, feeds
//! inbound frames into the [`Feed`], and reconnects after a fixed delay
//! whenever the socket is lost. The UI reads the feed and the
//! [`ConnectionState`] and calls [`ChannelManager::send`]; none of these
//! calls block or return errors.
//!
//! # Architecture
//!
//! ```text
//! UI ── set_identity / set_history / send ──▶ ChannelManager
//!                                               │ Shared (generation, state, feed)
//! UI ◀── watch: state, feed snapshots ──────────┤
//!                                               ▼
//!                                      session task ◀──▶ Socket
//! ```
//!
//! Every session carries a generation number. Tearing a session down or
//! switching rooms bumps the generation under the shared lock, and the
//! session task only writes while its generation is current, so frames
//! from a stale socket never reach the new room's feed.

pub mod feed;
mod session;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use url::Url;

use livechat_proto::envelope;
use livechat_proto::message::{Origin, OutgoingMessage};
use livechat_proto::room::{AuthToken, RoomId};

use crate::history::HistoryProvider;
use crate::transport::{Connector, Endpoint};

pub use feed::{Feed, FeedUpdate, Snapshot};

/// Delay between losing a connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "ws://127.0.0.1:8000/ws/chat/";

/// Connection status of the current room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// The socket is open; sends go through.
    Open,
    /// No session, or the session was torn down on purpose.
    ClosedClean,
    /// The socket was lost; a reconnect is scheduled.
    ClosedRetrying,
}

impl ConnectionState {
    /// Whether sends go through in this state.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::ClosedClean => write!(f, "closed"),
            Self::ClosedRetrying => write!(f, "reconnecting"),
        }
    }
}

/// Outcome of [`ChannelManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Queued on the open socket.
    Sent,
    /// Nothing was sent because the socket is not open.
    NotConnected,
    /// The payload could not be serialized.
    Unencodable,
}

impl SendStatus {
    /// Whether the frame was handed to the socket.
    #[must_use]
    pub const fn is_sent(self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// Settings for a [`ChannelManager`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Base URL rooms are appended to (`ws://` or `wss://`).
    pub base_url: Url,
    /// Fixed delay before reconnecting after an abnormal close.
    pub reconnect_delay: Duration,
}

impl ChannelConfig {
    /// Creates a config with the default reconnect delay.
    #[must_use]
    pub const fn new(base_url: Url) -> Self {
        Self {
            base_url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Override the reconnect delay.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// State shared between the manager handle and its session task.
struct Inner {
    generation: u64,
    state: ConnectionState,
    feed: Feed,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Inner {
    /// End the current generation: stale sessions lose write access.
    fn retire(&mut self) -> u64 {
        self.generation += 1;
        self.outbound = None;
        self.generation
    }
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    feed_tx: watch::Sender<Snapshot>,
}

impl Shared {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::ClosedClean);
        let (feed_tx, _) = watch::channel(Snapshot::default());
        Self {
            inner: Mutex::new(Inner {
                generation: 0,
                state: ConnectionState::ClosedClean,
                feed: Feed::new(),
                outbound: None,
            }),
            state_tx,
            feed_tx,
        }
    }

    /// Lock the shared state if `generation` is still the live session.
    fn lock_current(&self, generation: u64) -> Option<MutexGuard<'_, Inner>> {
        let inner = self.inner.lock();
        (inner.generation == generation).then_some(inner)
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state != state {
            tracing::debug!(from = %inner.state, to = %state, "connection state changed");
            inner.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn publish_feed(&self, inner: &Inner) {
        self.feed_tx.send_replace(inner.feed.snapshot());
    }

    fn mark_connecting(&self, generation: u64) -> bool {
        let Some(mut inner) = self.lock_current(generation) else {
            return false;
        };
        self.set_state(&mut inner, ConnectionState::Connecting);
        true
    }

    fn mark_open(&self, generation: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        let Some(mut inner) = self.lock_current(generation) else {
            return false;
        };
        inner.outbound = Some(outbound);
        self.set_state(&mut inner, ConnectionState::Open);
        true
    }

    fn mark_retrying(&self, generation: u64) -> bool {
        let Some(mut inner) = self.lock_current(generation) else {
            return false;
        };
        inner.outbound = None;
        self.set_state(&mut inner, ConnectionState::ClosedRetrying);
        true
    }

    /// Decode one inbound frame and apply it to the feed.
    ///
    /// Returns `false` if `generation` is stale; the frame is discarded.
    fn ingest(&self, generation: u64, text: &str) -> bool {
        let received_at = Utc::now();
        let frame = match envelope::decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping malformed frame");
                return self.inner.lock().generation == generation;
            }
        };

        let Some(mut inner) = self.lock_current(generation) else {
            return false;
        };
        if inner.feed.apply(frame, received_at).changed() {
            self.publish_feed(&inner);
        }
        true
    }

    fn replace_history(&self, inner: &mut Inner, records: Vec<Value>) {
        let update = inner.feed.replace_history(records, Origin::History, Utc::now());
        tracing::info!(?update, "feed replaced with history");
        self.publish_feed(inner);
    }
}

/// The running session, owned by the manager.
struct SessionHandle {
    generation: u64,
    room: RoomId,
    token: AuthToken,
    shutdown: oneshot::Sender<()>,
    /// Background session task (kept for the session's lifetime).
    _task: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
    fn stop(self) {
        // The task may already be gone; nothing to signal then.
        let _ = self.shutdown.send(());
    }
}

/// Owns the realtime connection for one chat room at a time.
///
/// All methods take `&self` and return immediately, so the manager can be
/// shared behind an `Arc`. Spawning a session requires a tokio runtime.
pub struct ChannelManager<C: Connector> {
    connector: Arc<C>,
    config: ChannelConfig,
    shared: Arc<Shared>,
    session: Mutex<Option<SessionHandle>>,
}

impl<C: Connector> ChannelManager<C> {
    /// Creates an inert manager in [`ConnectionState::ClosedClean`].
    #[must_use]
    pub fn new(connector: C, config: ChannelConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
            shared: Arc::new(Shared::new()),
            session: Mutex::new(None),
        }
    }

    /// Point the manager at a room.
    ///
    /// The same identity as the running session is a no-op. Anything else
    /// tears the running session down (no reconnect), clears its feed, and,
    /// when both `room` and `token` are present, starts a new session in
    /// [`ConnectionState::Connecting`]. With either missing the manager
    /// stays inert in [`ConnectionState::ClosedClean`].
    pub fn set_identity(&self, room: Option<RoomId>, token: Option<AuthToken>) {
        let mut session = self.session.lock();

        if let (Some(current), Some(room), Some(token)) = (session.as_ref(), &room, &token)
            && current.room == *room
            && current.token == *token
        {
            return;
        }

        let had_session = session.is_some();
        if let Some(previous) = session.take() {
            tracing::info!(room = %previous.room, "leaving room");
            previous.stop();
        }

        let target = match (room, token) {
            (Some(room), Some(token)) => {
                match Endpoint::for_room(&self.config.base_url, &room, &token) {
                    Ok(endpoint) => Some((room, token, endpoint)),
                    Err(e) => {
                        tracing::warn!(room = %room, error = %e, "cannot connect: bad endpoint");
                        None
                    }
                }
            }
            _ => {
                tracing::warn!("cannot connect: missing room or token");
                None
            }
        };

        let mut inner = self.shared.inner.lock();
        let generation = inner.retire();
        if had_session {
            inner.feed.clear();
            self.shared.publish_feed(&inner);
        }

        let Some((room, token, endpoint)) = target else {
            self.shared.set_state(&mut inner, ConnectionState::ClosedClean);
            return;
        };
        self.shared.set_state(&mut inner, ConnectionState::Connecting);
        drop(inner);

        tracing::info!(room = %room, generation, %endpoint, "joining room");
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(session::run(
            session::SessionContext {
                generation,
                room: room.clone(),
                endpoint,
                connector: Arc::clone(&self.connector),
                shared: Arc::clone(&self.shared),
                reconnect_delay: self.config.reconnect_delay,
            },
            shutdown_rx,
        ));

        *session = Some(SessionHandle {
            generation,
            room,
            token,
            shutdown,
            _task: task,
        });
    }

    /// Convenience for [`set_identity`](Self::set_identity) with both values.
    pub fn join(&self, room: RoomId, token: AuthToken) {
        self.set_identity(Some(room), Some(token));
    }

    /// Replace the feed with a history batch.
    ///
    /// An empty batch is ignored. A non-empty batch replaces everything in
    /// the feed, including live messages that already arrived.
    pub fn set_history(&self, records: Vec<Value>) {
        if records.is_empty() {
            return;
        }
        let mut inner = self.shared.inner.lock();
        self.shared.replace_history(&mut inner, records);
    }

    /// Fetch the current room's history from `provider` and apply it.
    ///
    /// Returns `true` if the feed was replaced. Nothing is applied when
    /// there is no session, the fetch fails, the batch is empty, or the
    /// room changed while the fetch was in flight.
    pub async fn load_history<P: HistoryProvider>(&self, provider: &P) -> bool {
        let Some((generation, room, token)) = self
            .session
            .lock()
            .as_ref()
            .map(|s| (s.generation, s.room.clone(), s.token.clone()))
        else {
            return false;
        };

        let records = match provider.fetch(&room, &token).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(room = %room, error = %e, "history fetch failed");
                return false;
            }
        };
        if records.is_empty() {
            return false;
        }

        let Some(mut inner) = self.shared.lock_current(generation) else {
            tracing::debug!(room = %room, "discarding history for a room we left");
            return false;
        };
        self.shared.replace_history(&mut inner, records);
        true
    }

    /// Send `payload` as a chat message.
    ///
    /// Fire-and-forget: the frame is queued only while the socket is open,
    /// and the feed is not touched (the server echo delivers it). When the
    /// socket is not open a warning is logged and
    /// [`SendStatus::NotConnected`] returned.
    pub fn send<T: Serialize>(&self, payload: &T) -> SendStatus {
        let inner = self.shared.inner.lock();
        let Some(outbound) = inner.outbound.as_ref().filter(|_| inner.state.is_open()) else {
            tracing::warn!(state = %inner.state, "cannot send message: socket not open");
            return SendStatus::NotConnected;
        };

        let frame = match envelope::encode_chat_message(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "cannot send message: payload not serializable");
                return SendStatus::Unencodable;
            }
        };

        if outbound.send(frame).is_err() {
            tracing::warn!("cannot send message: session task gone");
            return SendStatus::NotConnected;
        }
        SendStatus::Sent
    }

    /// Send a text message with a fresh client id.
    pub fn send_text(&self, content: impl Into<String>) -> SendStatus {
        self.send(&OutgoingMessage::new(content))
    }

    /// Tear down the running session.
    ///
    /// Cancels any pending reconnect, closes the socket, clears the feed
    /// and moves to [`ConnectionState::ClosedClean`]. Returns `false` if
    /// there was no session to tear down; calling it again is harmless.
    pub fn teardown(&self) -> bool {
        let Some(previous) = self.session.lock().take() else {
            return false;
        };
        tracing::info!(room = %previous.room, "room session torn down");
        previous.stop();

        let mut inner = self.shared.inner.lock();
        inner.retire();
        inner.feed.clear();
        self.shared.publish_feed(&inner);
        self.shared.set_state(&mut inner, ConnectionState::ClosedClean);
        true
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Current feed contents.
    #[must_use]
    pub fn messages(&self) -> Snapshot {
        self.shared.inner.lock().feed.snapshot()
    }

    /// The room of the running session, if any.
    #[must_use]
    pub fn room(&self) -> Option<RoomId> {
        self.session.lock().as_ref().map(|s| s.room.clone())
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Watch feed snapshots.
    #[must_use]
    pub fn subscribe_messages(&self) -> watch::Receiver<Snapshot> {
        self.shared.feed_tx.subscribe()
    }
}

impl<C: Connector> Drop for ChannelManager<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<C: Connector> fmt::Debug for ChannelManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("room", &self.room())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
