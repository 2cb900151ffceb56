//! End-to-end behaviour of an upgraded transport over an in-memory pipe.

use std::{io::Write, time::Duration};

use eio_websocket::{MessageKind, PacketType, Transport};
use futures_util::{SinkExt, StreamExt};
use test_util::{AnyResult, Event, WAIT, connect_pair};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

#[expect(clippy::panic_in_result_fn, reason = "test assertions")]
#[tokio::test]
async fn handshake_opens_a_live_transport() -> AnyResult<()> {
    let pair = connect_pair().await?;
    assert!(!pair.transport.is_closed());
    assert_eq!(pair.callback.close_count(), 0);
    Ok(())
}

#[expect(clippy::panic_in_result_fn, reason = "test assertions")]
#[tokio::test]
async fn abrupt_disconnect_after_one_packet_closes_once() -> AnyResult<()> {
    let mut pair = connect_pair().await?;
    pair.client.send(Message::text("4hello")).await?;
    assert_eq!(pair.events.next().await?, Event::text(PacketType::Message, "hello"));

    drop(pair.client);
    assert_eq!(pair.events.until_closed().await?, vec![Event::Closed]);
    timeout(WAIT, pair.transport.wait_closed()).await?;
    assert!(pair.transport.is_closed());
    assert_eq!(pair.callback.close_count(), 1);
    Ok(())
}

#[expect(clippy::panic_in_result_fn, reason = "test assertions")]
#[tokio::test]
async fn packets_arrive_in_order_before_a_decode_failure() -> AnyResult<()> {
    let mut pair = connect_pair().await?;
    pair.client.send(Message::text("2probe")).await?;
    pair.client.send(Message::binary(vec![4_u8, 0xde, 0xad])).await?;
    pair.client.send(Message::text("4third")).await?;
    pair.client.send(Message::text("x-not-a-packet")).await?;
    pair.client.send(Message::text("4never delivered")).await?;

    let events = pair.events.until_closed().await?;
    assert_eq!(
        events,
        vec![
            Event::text(PacketType::Ping, "probe"),
            Event::binary(PacketType::Message, &[0xde, 0xad]),
            Event::text(PacketType::Message, "third"),
            Event::Closed,
        ]
    );
    assert_eq!(pair.callback.close_count(), 1);
    Ok(())
}

#[expect(clippy::panic_in_result_fn, reason = "test assertions")]
#[tokio::test]
async fn writers_frame_by_message_kind() -> AnyResult<()> {
    let mut pair = connect_pair().await?;

    let mut writer = pair.transport.next_writer(MessageKind::Text, PacketType::Message)?;
    writer.write_all(b"hi")?;
    writer.close().await?;
    let mut writer = pair.transport.next_writer(MessageKind::Binary, PacketType::Message)?;
    writer.write_all(&[1, 2, 3])?;
    writer.close().await?;

    let first = timeout(WAIT, pair.client.next()).await?;
    assert!(matches!(first, Some(Ok(Message::Text(ref text))) if text.as_str() == "4hi"));
    let second = timeout(WAIT, pair.client.next()).await?;
    assert!(matches!(second, Some(Ok(Message::Binary(ref bytes))) if bytes.as_ref() == [4, 1, 2, 3]));
    Ok(())
}

#[expect(clippy::panic_in_result_fn, reason = "test assertions")]
#[tokio::test]
async fn concurrent_close_notifies_at_most_once() -> AnyResult<()> {
    let mut pair = connect_pair().await?;
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let transport = pair.transport.clone();
        tasks.push(tokio::spawn(async move { transport.close().await }));
    }
    for task in tasks {
        task.await??;
    }

    assert_eq!(pair.events.until_closed().await?, vec![Event::Closed]);
    sleep(Duration::from_millis(50)).await;
    assert!(pair.events.try_next().is_none());
    assert_eq!(pair.callback.close_count(), 1);
    assert!(pair.transport.next_writer(MessageKind::Text, PacketType::Noop).is_err());

    let frame = timeout(WAIT, pair.client.next()).await?;
    assert!(matches!(frame, Some(Ok(Message::Close(_)))));
    Ok(())
}

#[expect(clippy::panic_in_result_fn, reason = "test assertions")]
#[tokio::test]
async fn plain_http_calls_are_refused_without_disturbing_the_socket() -> AnyResult<()> {
    let mut pair = connect_pair().await?;
    let request = http::Request::get("/engine.io/?transport=polling").body(())?;
    let response = pair.transport.serve_http(&request);
    assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);

    pair.client.send(Message::text("6")).await?;
    assert_eq!(pair.events.next().await?, Event::text(PacketType::Noop, ""));
    assert!(!pair.transport.is_closed());
    Ok(())
}
