//! The background task behind one room session.
//!
//! Connects, pumps frames until the socket is lost, waits the reconnect
//! delay, and starts over. Every write to shared state is checked against
//! the session's generation; once the manager retires the generation the
//! task closes its socket and exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use livechat_proto::room::RoomId;

use super::Shared;
use crate::transport::{Connector, Endpoint, Socket};

pub(super) struct SessionContext<C: Connector> {
    pub(super) generation: u64,
    pub(super) room: RoomId,
    pub(super) endpoint: Endpoint,
    pub(super) connector: Arc<C>,
    pub(super) shared: Arc<Shared>,
    pub(super) reconnect_delay: Duration,
}

/// How a connected socket stopped.
enum Exit {
    /// Torn down on purpose, or the session went stale. No retry.
    Shutdown,
    /// Lost abnormally. Retry after the delay.
    Lost,
}

pub(super) async fn run<C: Connector>(ctx: SessionContext<C>, mut shutdown: oneshot::Receiver<()>) {
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        tracing::debug!(room = %ctx.room, attempt, "connecting");

        let connected = tokio::select! {
            _ = &mut shutdown => break,
            result = ctx.connector.connect(&ctx.endpoint) => result,
        };

        match connected {
            Ok(mut socket) => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                if !ctx.shared.mark_open(ctx.generation, outbound_tx) {
                    close_quietly(&mut socket).await;
                    break;
                }
                tracing::info!(room = %ctx.room, attempt, "room socket open");
                attempt = 0;

                match pump(&ctx, socket, outbound_rx, &mut shutdown).await {
                    Exit::Shutdown => break,
                    Exit::Lost => {}
                }
            }
            Err(e) => {
                tracing::warn!(room = %ctx.room, attempt, error = %e, "connect failed");
            }
        }

        if !ctx.shared.mark_retrying(ctx.generation) {
            break;
        }
        tracing::info!(
            room = %ctx.room,
            delay_ms = u64::try_from(ctx.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting after delay"
        );

        tokio::select! {
            _ = &mut shutdown => break,
            () = tokio::time::sleep(ctx.reconnect_delay) => {}
        }

        if !ctx.shared.mark_connecting(ctx.generation) {
            break;
        }
    }

    tracing::debug!(room = %ctx.room, generation = ctx.generation, "session task finished");
}

/// Move frames between the socket and the shared state until it stops.
async fn pump<C: Connector>(
    ctx: &SessionContext<C>,
    mut socket: C::Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Exit {
    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                close_quietly(&mut socket).await;
                return Exit::Shutdown;
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = socket.send_text(frame).await {
                    tracing::warn!(room = %ctx.room, error = %e, "send failed, dropping connection");
                    return Exit::Lost;
                }
            }
            incoming = socket.recv_text() => match incoming {
                Some(Ok(text)) => {
                    if !ctx.shared.ingest(ctx.generation, &text) {
                        close_quietly(&mut socket).await;
                        return Exit::Shutdown;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(room = %ctx.room, error = %e, "room socket error");
                    return Exit::Lost;
                }
                None => {
                    tracing::warn!(room = %ctx.room, "room socket closed unexpectedly");
                    return Exit::Lost;
                }
            },
        }
    }
}

async fn close_quietly<S: Socket>(socket: &mut S) {
    if let Err(e) = socket.close().await {
        tracing::debug!(error = %e, "socket close failed");
    }
}
