//! WebSocket transport adapter.
//!
//! [`WebSocketTransport`] bridges the [`Transport`] contract to a full-duplex
//! WebSocket connection.
//!
//! # Architecture
//!
//! 1. [`Upgrader`] validates the inbound [`Exchange`] and writes the
//!    `101 Switching Protocols` response.
//! 2. The upgraded stream is split: the outbound half goes to the shared
//!    connection handle, the inbound half to a reader task spawned once.
//! 3. The owner opens packet writers with [`Transport::next_writer`] from
//!    any task and may call [`Transport::close`] at any time.
//! 4. The reader delivers decoded packets to
//!    [`TransportCallback::on_packet`] in arrival order and, when it stops,
//!    fires [`TransportCallback::on_close`] exactly once.

mod connection;
pub mod exchange;
pub mod handshake;
mod read_loop;

#[cfg(test)]
mod tests;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures_util::StreamExt;
use http::{Request, Response, StatusCode};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
};
use tokio_tungstenite::WebSocketStream;

pub use self::{
    exchange::Exchange,
    handshake::{BufferConfig, DEFAULT_BUFFER_SIZE, HANDSHAKE_TIMEOUT, HandshakeError, Upgrader},
};
use self::connection::Connection;
use crate::{
    message::MessageKind,
    parser::{PacketEncoder, PacketType},
    transport::{Transport, TransportCallback, TransportError, frame::select_framing},
};

/// Externally observable lifecycle of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Frames flow in both directions.
    Open,
    /// The reader has stopped; the owner has been, or is being, notified.
    Closed,
}

impl LifecycleState {
    /// Returns `true` for [`LifecycleState::Closed`].
    #[must_use]
    pub const fn is_closed(self) -> bool { matches!(self, Self::Closed) }
}

/// Transport over an upgraded WebSocket connection.
///
/// Handles are cheap to clone and all refer to the same connection.
pub struct WebSocketTransport<S> {
    connection: Arc<Connection<S>>,
    lifecycle: Arc<watch::Sender<LifecycleState>>,
}

impl<S> Clone for WebSocketTransport<S> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl<S> fmt::Debug for WebSocketTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("state", &*self.lifecycle.borrow())
            .finish_non_exhaustive()
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Upgrade `exchange` and start serving it.
    ///
    /// Uses the default [`Upgrader`]: 10 KiB buffers, same-origin policy
    /// and silent rejections. The reader task is spawned before this
    /// returns; it must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the [`HandshakeError`] that stopped the upgrade. No reader is
    /// started and `callback` is never invoked in that case.
    pub async fn accept(
        exchange: Exchange<S>,
        callback: Arc<dyn TransportCallback>,
    ) -> Result<Self, HandshakeError> {
        Self::accept_with(&Upgrader::default(), exchange, callback).await
    }

    /// Upgrade `exchange` with a configured [`Upgrader`] and start serving it.
    ///
    /// # Errors
    ///
    /// Returns the [`HandshakeError`] that stopped the upgrade.
    pub async fn accept_with(
        upgrader: &Upgrader,
        exchange: Exchange<S>,
        callback: Arc<dyn TransportCallback>,
    ) -> Result<Self, HandshakeError> {
        let stream = upgrader.upgrade(exchange).await?;
        Ok(Self::from_stream(stream, callback))
    }

    /// Wrap an already upgraded stream and spawn its reader.
    pub(crate) fn from_stream(stream: WebSocketStream<S>, callback: Arc<dyn TransportCallback>) -> Self {
        let (sink, frames) = stream.split();
        let (lifecycle, _) = watch::channel(LifecycleState::Open);
        let transport = Self {
            connection: Arc::new(Connection::new(sink)),
            lifecycle: Arc::new(lifecycle),
        };
        tokio::spawn(read_loop::run(frames, transport.clone(), callback));
        transport
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState { *self.lifecycle.borrow() }

    /// Returns `true` once the reader has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.state().is_closed() }

    /// Wait until the reader has stopped.
    pub async fn wait_closed(&self) {
        let mut state = self.lifecycle.subscribe();
        while !state.borrow_and_update().is_closed() {
            if state.changed().await.is_err() {
                return;
            }
        }
    }

    fn mark_closed(&self) { self.lifecycle.send_replace(LifecycleState::Closed); }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn next_writer(
        &self,
        kind: MessageKind,
        packet_type: PacketType,
    ) -> Result<PacketEncoder, TransportError> {
        let framing = select_framing(kind);
        let frame = self.connection.open_frame(framing.frame)?;
        Ok(PacketEncoder::new(framing.encoder, frame, packet_type))
    }

    async fn close(&self) -> Result<(), TransportError> { self.connection.close().await }

    fn serve_http(&self, _request: &Request<()>) -> Response<()> {
        let mut response = Response::new(());
        *response.status_mut() = StatusCode::BAD_REQUEST;
        response
    }
}
