//! Transport layer abstraction for `LiveChat`.
//!
//! A [`Connector`] opens one [`Socket`] per connection attempt. Sockets carry
//! text frames only; the channel manager owns framing semantics.
//! Concrete implementations:
//! - [`ws::WsConnector`]: WebSocket via tokio-tungstenite
//! - [`loopback::LoopbackConnector`]: in-process channels for testing

pub mod loopback;
pub mod ws;

use std::fmt;
use std::future::Future;

use livechat_proto::room::{AuthToken, RoomId};
use url::Url;

/// Query parameter carrying the credential.
const TOKEN_PARAM: &str = "token";

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("server {0} is unreachable")]
    Unreachable(String),

    /// The endpoint URL cannot be used for a realtime connection.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The WebSocket layer reported a protocol or handshake failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The connection URL for one room.
///
/// Built as `<base>/<room>/?token=<token>`. `Display` and `Debug` redact the
/// token so endpoints can be logged freely.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Build the endpoint for `room` under `base`, authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidEndpoint`] if `base` is not a
    /// `ws://` or `wss://` URL that can carry path segments.
    pub fn for_room(base: &Url, room: &RoomId, token: &AuthToken) -> Result<Self, TransportError> {
        validate_base(base)?;
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                TransportError::InvalidEndpoint(format!("{base} cannot carry a room path"))
            })?;
            segments.pop_if_empty().push(room.as_str()).push("");
        }
        url.query_pairs_mut()
            .clear()
            .append_pair(TOKEN_PARAM, token.expose());
        Ok(Self { url })
    }

    /// The full URL, credential included. Never log this.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    fn redacted(&self) -> Url {
        let mut shown = self.url.clone();
        shown.set_query(Some("token=***"));
        shown
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Endpoint").field(&self.redacted().as_str()).finish()
    }
}

/// Check that `base` can serve as a realtime base URL.
///
/// # Errors
///
/// Returns [`TransportError::InvalidEndpoint`] for non-WebSocket schemes or
/// URLs without a path.
pub fn validate_base(base: &Url) -> Result<(), TransportError> {
    if !matches!(base.scheme(), "ws" | "wss") {
        return Err(TransportError::InvalidEndpoint(format!(
            "unsupported scheme {:?} (expected ws or wss)",
            base.scheme()
        )));
    }
    if base.cannot_be_a_base() {
        return Err(TransportError::InvalidEndpoint(format!(
            "{base} cannot carry a room path"
        )));
    }
    Ok(())
}

/// Opens sockets to an [`Endpoint`].
pub trait Connector: Send + Sync + 'static {
    /// The socket type produced by this connector.
    type Socket: Socket;

    /// Open a connection. Resolves once the socket is open.
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Socket, TransportError>> + Send;
}

/// A live, text-framed, bidirectional connection.
pub trait Socket: Send + 'static {
    /// Send one text frame.
    fn send_text(
        &mut self,
        text: String,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next text frame.
    ///
    /// Returns `None` once the connection has closed. Must be cancel safe:
    /// dropping the future before it resolves loses no frame.
    fn recv_text(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;

    /// Close the connection gracefully.
    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
