//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels in place of a network.
//! [`LoopbackConnector::pair`] returns the client-side connector together
//! with a [`LoopbackServer`] that sees every connection attempt and decides
//! whether to accept or refuse it. An accepted attempt yields a
//! [`LoopbackPeer`] that pushes frames to the client, reads what the client
//! sent, and can drop the connection to simulate a network failure.

use tokio::sync::{mpsc, oneshot};

use super::{Connector, Endpoint, Socket, TransportError};

type Inbound = Result<String, TransportError>;

/// Client side of the loopback transport.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    attempts: mpsc::UnboundedSender<PendingConnection>,
}

impl LoopbackConnector {
    /// Create a connector and the server that receives its connection attempts.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use livechat::transport::loopback::LoopbackConnector;
    ///
    /// # async fn example() {
    /// let (connector, mut server) = LoopbackConnector::pair();
    /// // hand `connector` to a ChannelManager, then:
    /// let peer = server.accept().await.unwrap();
    /// peer.push(r#"{"type":"chat_message","message":{"content":"hi"}}"#);
    /// # }
    /// ```
    #[must_use]
    pub fn pair() -> (Self, LoopbackServer) {
        let (attempts, incoming) = mpsc::unbounded_channel();
        (Self { attempts }, LoopbackServer { incoming })
    }
}

impl Connector for LoopbackConnector {
    type Socket = LoopbackSocket;

    async fn connect(&self, endpoint: &Endpoint) -> Result<LoopbackSocket, TransportError> {
        let (reply, answer) = oneshot::channel();
        self.attempts
            .send(PendingConnection {
                endpoint: endpoint.clone(),
                reply,
            })
            .map_err(|_| TransportError::Unreachable(endpoint.to_string()))?;
        answer
            .await
            .map_err(|_| TransportError::Unreachable(endpoint.to_string()))?
    }
}

/// Server side of the loopback transport.
#[derive(Debug)]
pub struct LoopbackServer {
    incoming: mpsc::UnboundedReceiver<PendingConnection>,
}

impl LoopbackServer {
    /// Wait for the next connection attempt.
    ///
    /// Returns `None` once every connector clone has been dropped.
    pub async fn next_connection(&mut self) -> Option<PendingConnection> {
        self.incoming.recv().await
    }

    /// Take a connection attempt if one is already waiting.
    pub fn try_next_connection(&mut self) -> Option<PendingConnection> {
        self.incoming.try_recv().ok()
    }

    /// Wait for the next connection attempt and accept it.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        Some(self.next_connection().await?.accept())
    }
}

/// A connection attempt waiting for the server's answer.
#[derive(Debug)]
pub struct PendingConnection {
    endpoint: Endpoint,
    reply: oneshot::Sender<Result<LoopbackSocket, TransportError>>,
}

impl PendingConnection {
    /// The endpoint the client is connecting to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Accept the attempt, opening the client's socket.
    #[must_use]
    pub fn accept(self) -> LoopbackPeer {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        // A client that already gave up leaves the peer looking closed.
        let _ = self.reply.send(Ok(LoopbackSocket {
            inbound,
            outbound: Some(outbound),
        }));
        LoopbackPeer {
            endpoint: self.endpoint,
            to_client,
            from_client,
        }
    }

    /// Refuse the attempt; the client's connect fails with `Unreachable`.
    pub fn refuse(self) {
        let err = TransportError::Unreachable(self.endpoint.to_string());
        let _ = self.reply.send(Err(err));
    }
}

/// The server's end of an accepted loopback connection.
#[derive(Debug)]
pub struct LoopbackPeer {
    endpoint: Endpoint,
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl LoopbackPeer {
    /// The endpoint the client connected to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Deliver a text frame to the client.
    ///
    /// Returns `false` if the client side is gone.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Ok(text.into())).is_ok()
    }

    /// Wait for the next frame the client sent.
    ///
    /// Returns `None` once the client has closed or dropped its socket.
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Take a client frame if one is already waiting.
    pub fn try_next_outbound(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Stop accepting client frames; the client's next send fails.
    pub fn stop_reading(&mut self) {
        self.from_client.close();
    }

    /// Whether the client has closed or dropped its socket.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }

    /// Wait until the client has closed or dropped its socket.
    pub async fn closed(&self) {
        self.to_client.closed().await;
    }

    /// Report a transport error to the client and drop the connection.
    pub fn fail(self, err: TransportError) {
        let _ = self.to_client.send(Err(err));
    }

    /// Drop the connection without a close handshake.
    #[allow(clippy::needless_pass_by_value)]
    pub fn disconnect(self) {}
}

/// The client's end of an accepted loopback connection.
#[derive(Debug)]
pub struct LoopbackSocket {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Socket for LoopbackSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        tx.send(text).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        self.inbound.close();
        Ok(())
    }
}
