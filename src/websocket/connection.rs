//! Duplex connection handle owned by the WebSocket adapter.
//!
//! The handle keeps the outbound half of the split WebSocket stream behind
//! an async mutex and publishes close requests on a watch channel so the
//! reader task wakes up and fails its pending read.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, stream::SplitSink};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Mutex as TokioMutex, watch},
    time::timeout,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};

use crate::transport::{
    TransportError,
    frame::{FrameKind, FrameSink, OutboundFrame},
};

/// Upper bound on flushing the close frame to a peer that stopped reading.
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type Outbound<S> = SplitSink<WebSocketStream<S>, Message>;

pub(crate) struct Connection<S> {
    sink: TokioMutex<Outbound<S>>,
    close_requested: watch::Sender<bool>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(sink: Outbound<S>) -> Self {
        let (close_requested, _) = watch::channel(false);
        Self {
            sink: TokioMutex::new(sink),
            close_requested,
        }
    }

    /// Subscribe to close requests made through [`Connection::close`].
    pub(crate) fn close_signal(&self) -> watch::Receiver<bool> { self.close_requested.subscribe() }

    pub(crate) fn is_close_requested(&self) -> bool { *self.close_requested.borrow() }

    /// Start a new outbound frame of the given kind.
    pub(crate) fn open_frame(self: &Arc<Self>, kind: FrameKind) -> Result<OutboundFrame, TransportError> {
        if self.is_close_requested() {
            return Err(TransportError::ConnectionClosed);
        }
        let sink: Arc<dyn FrameSink> = Arc::clone(self) as Arc<dyn FrameSink>;
        Ok(OutboundFrame::new(kind, sink))
    }

    /// Close the connection.
    ///
    /// Only the first call does any work: it wakes the reader and sends a
    /// close frame. Later calls return `Ok(())` immediately.
    pub(crate) async fn close(&self) -> Result<(), TransportError> {
        if !self.request_close() {
            return Ok(());
        }
        self.shutdown_sink().await
    }

    /// Publish the close request without touching the sink.
    ///
    /// Returns `true` for the call that made the transition. Pending sends
    /// observe the request and release the sink.
    pub(crate) fn request_close(&self) -> bool { !self.close_requested.send_replace(true) }

    /// Send the close frame, bounded by [`CLOSE_TIMEOUT`].
    pub(crate) async fn shutdown_sink(&self) -> Result<(), TransportError> {
        let closing = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match timeout(CLOSE_TIMEOUT, closing).await {
            Ok(Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(TransportError::CloseTimedOut),
        }
    }

    async fn send_locked(&self, message: Message) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        // a close may have landed while this send waited for the lock
        if self.is_close_requested() {
            return Err(TransportError::ConnectionClosed);
        }
        sink.send(message).await.map_err(|err| match err {
            WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::SendAfterClosing) => TransportError::ConnectionClosed,
            other => TransportError::WebSocket(other),
        })
    }
}

/// Resolve once `signal` reports a close request.
pub(crate) async fn close_requested(signal: &mut watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl<S> FrameSink for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_frame(&self, kind: FrameKind, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.is_close_requested() {
            return Err(TransportError::ConnectionClosed);
        }
        let message = match kind {
            FrameKind::Text => Message::text(String::from_utf8(bytes).map_err(|_| TransportError::InvalidText)?),
            FrameKind::Binary => Message::binary(bytes),
        };
        let mut close_signal = self.close_signal();
        tokio::select! {
            biased;
            () = close_requested(&mut close_signal) => Err(TransportError::ConnectionClosed),
            res = self.send_locked(message) => res,
        }
    }
}
