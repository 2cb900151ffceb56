//! Utilities for integration tests.
//!
//! The `test-util` crate records transport callbacks, builds raw upgrade
//! requests and performs real client handshakes against the adapter over
//! in-memory pipes. It is used by integration tests in the main crate.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use eio_websocket::{
    Exchange, MessageKind, PacketDecoder, PacketType, Transport, TransportCallback,
    WebSocketTransport,
};
use tokio::{
    io::{DuplexStream, duplex},
    sync::mpsc,
    time::timeout,
};
use tokio_tungstenite::{WebSocketStream, client_async};

/// Error type returned by fallible test helpers.
pub type AnyError = anyhow::Error;

/// Result alias for integration tests.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Default wait used by helpers before giving up on an event.
pub const WAIT: Duration = Duration::from_secs(5);

/// Capacity of the in-memory pipes created by [`connect_pair`].
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Target used by client handshakes.
pub const ENGINE_URL: &str = "ws://localhost/engine.io/?EIO=3&transport=websocket";

/// Sample challenge key from RFC 6455, section 1.3.
pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Callback observed by a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A packet was delivered to `on_packet`.
    Packet {
        /// Decoded packet type.
        packet_type: PacketType,
        /// Frame flavour the packet arrived in.
        kind: MessageKind,
        /// Payload bytes after the type header.
        payload: Vec<u8>,
    },
    /// `on_close` fired.
    Closed,
}

impl Event {
    /// Shorthand for a text packet event.
    #[must_use]
    pub fn text(packet_type: PacketType, payload: &str) -> Self {
        Self::Packet {
            packet_type,
            kind: MessageKind::Text,
            payload: payload.as_bytes().to_vec(),
        }
    }

    /// Shorthand for a binary packet event.
    #[must_use]
    pub fn binary(packet_type: PacketType, payload: &[u8]) -> Self {
        Self::Packet {
            packet_type,
            kind: MessageKind::Binary,
            payload: payload.to_vec(),
        }
    }
}

/// Callback that forwards every notification to an [`EventLog`].
#[derive(Debug)]
pub struct RecordingCallback {
    events: mpsc::UnboundedSender<Event>,
    closes: AtomicUsize,
}

impl RecordingCallback {
    /// Create a callback and the log it feeds.
    #[must_use]
    pub fn new() -> (Arc<Self>, EventLog) {
        let (events, rx) = mpsc::unbounded_channel();
        let callback = Arc::new(Self {
            events,
            closes: AtomicUsize::new(0),
        });
        (callback, EventLog { events: rx })
    }

    /// Number of times `on_close` has fired.
    #[must_use]
    pub fn close_count(&self) -> usize { self.closes.load(Ordering::SeqCst) }
}

#[async_trait]
impl TransportCallback for RecordingCallback {
    async fn on_packet(&self, decoder: &mut PacketDecoder) {
        let event = Event::Packet {
            packet_type: decoder.packet_type(),
            kind: decoder.message_kind(),
            payload: decoder.payload().to_vec(),
        };
        // the log may already be dropped by a finished test
        let _ = self.events.send(event);
    }

    async fn on_close(&self, _transport: &dyn Transport) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(Event::Closed);
    }
}

/// Receiving side of a [`RecordingCallback`].
#[derive(Debug)]
pub struct EventLog {
    events: mpsc::UnboundedReceiver<Event>,
}

impl EventLog {
    /// Wait for the next event.
    ///
    /// # Errors
    ///
    /// Fails if nothing arrives within [`WAIT`] or the callback is gone.
    pub async fn next(&mut self) -> Result<Event> {
        timeout(WAIT, self.events.recv())
            .await
            .context("timed out waiting for a callback")?
            .ok_or_else(|| anyhow!("callback dropped"))
    }

    /// Collect events up to and including [`Event::Closed`].
    ///
    /// # Errors
    ///
    /// Fails if the close notification does not arrive in time.
    pub async fn until_closed(&mut self) -> Result<Vec<Event>> {
        let mut seen = Vec::new();
        loop {
            let event = self.next().await?;
            let done = event == Event::Closed;
            seen.push(event);
            if done {
                return Ok(seen);
            }
        }
    }

    /// Returns the next event if one is already queued.
    #[must_use]
    pub fn try_next(&mut self) -> Option<Event> { self.events.try_recv().ok() }
}

/// Build a raw HTTP/1.1 upgrade request head.
///
/// `extra` lines are appended verbatim after the standard headers.
#[must_use]
pub fn upgrade_request(method: &str, extra: &[&str]) -> String {
    let mut head = format!(
        "{method} /engine.io/?EIO=3&transport=websocket HTTP/1.1\r\nHost: localhost\r\nConnection: \
         Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: \
         {SAMPLE_KEY}\r\n"
    );
    for line in extra {
        head.push_str(line);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}

/// A transport with a live client on the other end of an in-memory pipe.
pub struct Pair {
    /// Server-side transport under test.
    pub transport: WebSocketTransport<DuplexStream>,
    /// Client end of the upgraded connection.
    pub client: WebSocketStream<DuplexStream>,
    /// Callback installed on the transport.
    pub callback: Arc<RecordingCallback>,
    /// Events recorded by `callback`.
    pub events: EventLog,
}

/// Perform a real client handshake against [`WebSocketTransport::accept`].
///
/// # Errors
///
/// Fails if either side of the handshake fails or stalls.
pub async fn connect_pair() -> Result<Pair> {
    let (client_io, server_io) = duplex(PIPE_CAPACITY);
    let (callback, events) = RecordingCallback::new();
    let server_callback: Arc<dyn TransportCallback> = callback.clone();

    let server = async move {
        let exchange = Exchange::read_from(server_io).await?;
        WebSocketTransport::accept(exchange, server_callback).await
    };
    let client = client_async(ENGINE_URL, client_io);
    let (server, client) = timeout(WAIT, async { tokio::join!(server, client) })
        .await
        .context("handshake stalled")?;

    let transport = server.context("server side of the handshake failed")?;
    let (client, _response) = client.context("client side of the handshake failed")?;
    Ok(Pair {
        transport,
        client,
        callback,
        events,
    })
}
