//! Background reader that turns inbound frames into packet callbacks.
//!
//! The loop owns the inbound half of the WebSocket stream for the whole life
//! of the connection. Each data frame is decoded, handed to the owner, and
//! released before the next frame is read. Control frames are absorbed. The
//! first read failure, decode failure, owner panic or local close request
//! ends the loop. The close is published and `on_close` fires once before
//! the close frame is flushed.

use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use bytes::Bytes;
use futures_util::{FutureExt, StreamExt, stream::SplitStream};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, info, warn};

use super::{WebSocketTransport, connection::close_requested};
use crate::{
    parser::{PacketDecoder, ParseError},
    transport::{TransportCallback, frame::FrameKind},
};

/// Why the read loop stopped.
#[derive(Debug)]
pub(crate) enum Termination {
    /// The peer ended the stream.
    PeerClosed,
    /// Reading the next frame failed.
    ReadFailed(WsError),
    /// A data frame could not be decoded into a packet.
    DecodeFailed(ParseError),
    /// The owner closed the connection.
    LocalClose,
    /// The owner's packet callback panicked.
    CallbackPanicked,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed the stream"),
            Self::ReadFailed(err) => write!(f, "read failed: {err}"),
            Self::DecodeFailed(err) => write!(f, "decode failed: {err}"),
            Self::LocalClose => f.write_str("closed locally"),
            Self::CallbackPanicked => f.write_str("packet callback panicked"),
        }
    }
}

/// Run the reader until the connection ends, then notify the owner.
pub(super) async fn run<S>(
    mut frames: SplitStream<WebSocketStream<S>>,
    transport: WebSocketTransport<S>,
    callback: Arc<dyn TransportCallback>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut close_signal = transport.connection.close_signal();
    let reason = serve(&mut frames, &mut close_signal, callback.as_ref()).await;
    info!(%reason, "websocket read loop terminated");

    // Publish the close before notifying so a writer stalled on a peer that
    // stopped reading cannot hold back `on_close`.
    let initiated = transport.connection.request_close();
    transport.mark_closed();
    if AssertUnwindSafe(callback.on_close(&transport)).catch_unwind().await.is_err() {
        warn!("on_close callback panicked");
    }
    if initiated {
        if let Err(error) = transport.connection.shutdown_sink().await {
            debug!(%error, "closing connection after read loop exit failed");
        }
    }
}

async fn serve<S>(
    frames: &mut SplitStream<WebSocketStream<S>>,
    close_signal: &mut watch::Receiver<bool>,
    callback: &dyn TransportCallback,
) -> Termination
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            () = close_requested(close_signal) => return Termination::LocalClose,
            next = frames.next() => next,
        };
        let message = match next {
            None => return Termination::PeerClosed,
            Some(Err(err)) => return Termination::ReadFailed(err),
            Some(Ok(message)) => message,
        };
        let Some((frame_kind, bytes)) = classify(message) else {
            debug!("ignoring control frame");
            continue;
        };
        let mut decoder = match PacketDecoder::new(bytes) {
            Ok(decoder) => decoder,
            Err(error) => {
                warn!(%error, %frame_kind, "dropping connection on undecodable frame");
                return Termination::DecodeFailed(error);
            }
        };
        debug!(packet_type = %decoder.packet_type(), %frame_kind, "dispatching packet");
        let delivered = AssertUnwindSafe(callback.on_packet(&mut decoder)).catch_unwind().await;
        let unread = decoder.close();
        if delivered.is_err() {
            warn!("on_packet callback panicked; dropping connection");
            return Termination::CallbackPanicked;
        }
        if unread > 0 {
            debug!(unread, "released decoder with unread payload");
        }
    }
}

/// Split a data frame into its kind and bytes; control frames yield `None`.
pub(crate) fn classify(message: Message) -> Option<(FrameKind, Bytes)> {
    match message {
        Message::Text(text) => Some((FrameKind::Text, Bytes::copy_from_slice(text.as_bytes()))),
        Message::Binary(data) => Some((FrameKind::Binary, data)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}
