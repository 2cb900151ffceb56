//! Transport contracts between the protocol engine and a concrete connection.
//!
//! The engine drives every transport through two narrow capabilities:
//!
//! - [`Transport`], the writer factory and close operation a transport
//!   exposes to its owner;
//! - [`TransportCallback`], the owner-side hooks a transport invokes for each
//!   decoded inbound packet and, exactly once, when its lifecycle ends.
//!
//! The WebSocket adapter in [`crate::websocket`] implements both sides of
//! this boundary; session state, heartbeats and transport fallback belong
//! to the owner.

pub mod frame;

use std::io;

use async_trait::async_trait;
use http::{Request, Response};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::{
    message::MessageKind,
    parser::{PacketDecoder, PacketEncoder, PacketType},
};

/// Errors surfaced by outbound transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection has been closed; no further frames can be opened.
    #[error("connection closed")]
    ConnectionClosed,
    /// A text frame was finished with bytes that are not UTF-8.
    #[error("text frame payload is not valid UTF-8")]
    InvalidText,
    /// The close frame could not be flushed in time.
    #[error("timed out sending the close frame")]
    CloseTimedOut,
    /// Writing into the packet buffer failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The WebSocket layer rejected the operation.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Writer factory and lifecycle control exposed to the owning engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a single-use writer for one outbound packet.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] when the connection can
    /// no longer accept outbound frames.
    fn next_writer(
        &self,
        kind: MessageKind,
        packet_type: PacketType,
    ) -> Result<PacketEncoder, TransportError>;

    /// Ask the underlying connection to close.
    ///
    /// Closing never invokes [`TransportCallback::on_close`] directly; the
    /// notification comes from the transport's reader once it observes the
    /// closure.
    ///
    /// # Errors
    ///
    /// Propagates failures reported while closing the connection.
    async fn close(&self) -> Result<(), TransportError>;

    /// Answer a plain HTTP request routed to this transport.
    fn serve_http(&self, request: &Request<()>) -> Response<()>;
}

/// Owner-side hooks invoked by a transport.
///
/// Hooks run on the transport's reader task without any transport lock
/// held, so they may call back into the [`Transport`] freely.
#[async_trait]
pub trait TransportCallback: Send + Sync {
    /// Handle one decoded inbound packet.
    ///
    /// Calls are strictly sequential and arrive in frame order. The decoder
    /// is only borrowed; the transport releases it after this returns.
    async fn on_packet(&self, decoder: &mut PacketDecoder);

    /// Called exactly once when the transport's lifecycle ends.
    async fn on_close(&self, transport: &dyn Transport);
}
