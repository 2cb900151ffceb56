//! Unit tests for the WebSocket adapter over an in-memory duplex pipe.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rstest::rstest;
use tokio::{
    io::{DuplexStream, duplex},
    sync::mpsc,
    time::timeout,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Message, protocol::Role},
};

use super::*;
use crate::parser::PacketDecoder;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Packet(PacketType, MessageKind, Vec<u8>),
    Closed,
}

struct Recorder {
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl TransportCallback for Recorder {
    async fn on_packet(&self, decoder: &mut PacketDecoder) {
        let event = Event::Packet(
            decoder.packet_type(),
            decoder.message_kind(),
            decoder.payload().to_vec(),
        );
        let _ = self.events.send(event);
    }

    async fn on_close(&self, transport: &dyn Transport) {
        assert!(
            transport
                .next_writer(MessageKind::Text, PacketType::Noop)
                .is_err(),
            "writers must fail once the transport is closed"
        );
        let _ = self.events.send(Event::Closed);
    }
}

/// Records closure but panics on any packet carrying `boom`.
struct Panicky {
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl TransportCallback for Panicky {
    async fn on_packet(&self, decoder: &mut PacketDecoder) {
        assert!(decoder.payload() != b"boom", "owner failed on packet");
        let event = Event::Packet(
            decoder.packet_type(),
            decoder.message_kind(),
            decoder.payload().to_vec(),
        );
        let _ = self.events.send(event);
    }

    async fn on_close(&self, _transport: &dyn Transport) { let _ = self.events.send(Event::Closed); }
}

fn recorder(events: mpsc::UnboundedSender<Event>) -> Arc<dyn TransportCallback> { Arc::new(Recorder { events }) }

fn panicky(events: mpsc::UnboundedSender<Event>) -> Arc<dyn TransportCallback> { Arc::new(Panicky { events }) }

struct Harness {
    transport: WebSocketTransport<DuplexStream>,
    client: WebSocketStream<DuplexStream>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Harness {
    async fn new() -> Self { Self::with_callback(64 * 1024, recorder).await }

    async fn with_callback<F>(capacity: usize, callback: F) -> Self
    where
        F: FnOnce(mpsc::UnboundedSender<Event>) -> Arc<dyn TransportCallback>,
    {
        let (client_io, server_io) = duplex(capacity);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let (tx, events) = mpsc::unbounded_channel();
        let transport = WebSocketTransport::from_stream(server, callback(tx));
        Self {
            transport,
            client,
            events,
        }
    }

    async fn send(&mut self, message: Message) { self.client.send(message).await.expect("client send"); }

    async fn next_event(&mut self) -> Event {
        timeout(WAIT, self.events.recv())
            .await
            .expect("event timed out")
            .expect("event channel open")
    }

    async fn next_client_message(&mut self) -> Message {
        timeout(WAIT, self.client.next())
            .await
            .expect("client read timed out")
            .expect("client stream open")
            .expect("client frame")
    }

    /// Drop the client, wait for the reader to stop and collect whatever
    /// events are still queued.
    async fn drain_events(self) -> Vec<Event> {
        let Self {
            transport,
            client,
            mut events,
        } = self;
        drop(client);
        timeout(WAIT, transport.wait_closed())
            .await
            .expect("transport never closed");
        let mut remaining = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_millis(100), events.recv()).await {
            remaining.push(event);
        }
        remaining
    }
}

#[rstest]
#[tokio::test]
async fn delivers_packets_in_order_then_closes_once() {
    let mut harness = Harness::new().await;
    harness.send(Message::text("4first")).await;
    harness.send(Message::binary(vec![4, 0xbe, 0xef])).await;
    harness.send(Message::text("2probe")).await;

    assert_eq!(
        harness.next_event().await,
        Event::Packet(PacketType::Message, MessageKind::Text, b"first".to_vec())
    );
    assert_eq!(
        harness.next_event().await,
        Event::Packet(PacketType::Message, MessageKind::Binary, vec![0xbe, 0xef])
    );
    assert_eq!(
        harness.next_event().await,
        Event::Packet(PacketType::Ping, MessageKind::Text, b"probe".to_vec())
    );

    let remaining = harness.drain_events().await;
    assert_eq!(remaining, vec![Event::Closed]);
}

#[rstest]
#[tokio::test]
async fn control_frames_are_absorbed() {
    let mut harness = Harness::new().await;
    harness.send(Message::Ping(Bytes::from_static(b"hb"))).await;
    harness.send(Message::Pong(Bytes::new())).await;
    harness.send(Message::text("4after")).await;

    assert_eq!(
        harness.next_event().await,
        Event::Packet(PacketType::Message, MessageKind::Text, b"after".to_vec())
    );
    assert!(!harness.transport.is_closed());
}

#[rstest]
#[case(Message::text("9bogus"))]
#[case(Message::text(""))]
#[case(Message::binary(vec![0x2a]))]
#[tokio::test]
async fn undecodable_frame_ends_the_connection(#[case] bad: Message) {
    let mut harness = Harness::new().await;
    harness.send(bad).await;
    harness.send(Message::text("4never")).await;

    assert_eq!(harness.next_event().await, Event::Closed);
    assert!(harness.transport.is_closed());
    assert_eq!(harness.drain_events().await, Vec::new());
}

#[rstest]
#[case(MessageKind::Text, Message::text("4hello"))]
#[case(MessageKind::Binary, Message::binary(vec![4, b'h', b'e', b'l', b'l', b'o']))]
#[tokio::test]
async fn writers_frame_by_message_kind(#[case] kind: MessageKind, #[case] expected: Message) {
    use std::io::Write;

    let mut harness = Harness::new().await;
    let mut writer = harness
        .transport
        .next_writer(kind, PacketType::Message)
        .expect("open writer");
    writer.write_all(b"hello").expect("buffer payload");
    writer.close().await.expect("send frame");

    assert_eq!(harness.next_client_message().await, expected);
}

#[rstest]
#[tokio::test]
async fn invalid_utf8_text_is_rejected_before_sending() {
    use std::io::Write;

    let harness = Harness::new().await;
    let mut writer = harness
        .transport
        .next_writer(MessageKind::Text, PacketType::Message)
        .expect("open writer");
    writer.write_all(&[0xff, 0xfe]).expect("buffer payload");

    let err = writer.close().await.expect_err("should reject");
    assert!(matches!(err, TransportError::InvalidText), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn local_close_notifies_once_and_blocks_writers() {
    let mut harness = Harness::new().await;
    let first = harness.transport.clone();
    let second = harness.transport.clone();
    let (a, b) = tokio::join!(first.close(), second.close());
    a.expect("first close");
    b.expect("second close");

    assert_eq!(harness.next_event().await, Event::Closed);
    let err = harness
        .transport
        .next_writer(MessageKind::Binary, PacketType::Message)
        .expect_err("closed");
    assert!(matches!(err, TransportError::ConnectionClosed));
    harness.transport.close().await.expect("repeat close is a no-op");

    assert!(matches!(
        harness.next_client_message().await,
        Message::Close(_)
    ));
    assert_eq!(harness.drain_events().await, Vec::new());
}

#[rstest]
#[tokio::test]
async fn plain_http_requests_are_refused() {
    let mut harness = Harness::new().await;
    let request = Request::builder().uri("/engine.io/").body(()).expect("request");

    let response = harness.transport.serve_http(&request);

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!harness.transport.is_closed());
    harness.send(Message::text("4still-open")).await;
    assert_eq!(
        harness.next_event().await,
        Event::Packet(PacketType::Message, MessageKind::Text, b"still-open".to_vec())
    );
}

#[rstest]
#[tokio::test]
async fn decode_failure_closes_despite_a_stalled_writer() {
    use std::io::Write;

    let mut harness = Harness::with_callback(1024, recorder).await;
    let mut writer = harness
        .transport
        .next_writer(MessageKind::Binary, PacketType::Message)
        .expect("open writer");
    writer.write_all(&vec![7; 64 * 1024]).expect("buffer payload");
    let stalled = tokio::spawn(writer.close());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stalled.is_finished(), "peer is not reading, so the send should stall");

    harness.send(Message::text("zzz")).await;

    assert_eq!(harness.next_event().await, Event::Closed);
    assert!(harness.transport.is_closed());
    let result = timeout(WAIT, stalled)
        .await
        .expect("stalled writer gives up")
        .expect("join");
    assert!(matches!(result, Err(TransportError::ConnectionClosed)), "got {result:?}");
}

#[rstest]
#[tokio::test]
async fn panicking_owner_still_gets_one_close() {
    let mut harness = Harness::with_callback(64 * 1024, panicky).await;
    harness.send(Message::text("4fine")).await;
    harness.send(Message::text("4boom")).await;
    harness.send(Message::text("4never")).await;

    assert_eq!(
        harness.next_event().await,
        Event::Packet(PacketType::Message, MessageKind::Text, b"fine".to_vec())
    );
    assert_eq!(harness.next_event().await, Event::Closed);
    timeout(WAIT, harness.transport.wait_closed())
        .await
        .expect("wait_closed returns");
    assert!(harness.transport.is_closed());
    assert!(
        harness
            .transport
            .next_writer(MessageKind::Text, PacketType::Noop)
            .is_err()
    );
}
