//! Echo owner used by the demonstration server.
//!
//! The owner answers heartbeat pings and mirrors application messages back
//! to the peer. Packets cross from the transport's reader task to the
//! session task over an unbounded channel so the reader never waits on
//! outbound writes.

use std::{io::Write, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    message::MessageKind,
    parser::{PacketDecoder, PacketType},
    transport::{Transport, TransportCallback, TransportError},
};

/// What the echo owner does with an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoAction {
    /// Send the payload back with this packet type.
    Respond(PacketType),
    /// Close the transport.
    Close,
    /// Drop the packet.
    Ignore,
}

impl EchoAction {
    /// Decide how to answer a packet of type `packet_type`.
    #[must_use]
    pub const fn for_packet(packet_type: PacketType) -> Self {
        match packet_type {
            PacketType::Ping => Self::Respond(PacketType::Pong),
            PacketType::Message => Self::Respond(PacketType::Message),
            PacketType::Close => Self::Close,
            PacketType::Open | PacketType::Pong | PacketType::Upgrade | PacketType::Noop => {
                Self::Ignore
            }
        }
    }
}

#[derive(Debug)]
struct InboundPacket {
    packet_type: PacketType,
    kind: MessageKind,
    payload: Vec<u8>,
}

/// Callback half of an echo session.
pub struct EchoCallback {
    packets: mpsc::UnboundedSender<InboundPacket>,
}

#[async_trait]
impl TransportCallback for EchoCallback {
    async fn on_packet(&self, decoder: &mut PacketDecoder) {
        let packet = InboundPacket {
            packet_type: decoder.packet_type(),
            kind: decoder.message_kind(),
            payload: decoder.payload().to_vec(),
        };
        if self.packets.send(packet).is_err() {
            debug!("echo session already finished; dropping packet");
        }
    }

    async fn on_close(&self, _transport: &dyn Transport) { debug!("echo transport closed"); }
}

/// Session half of an echo session; runs until the transport closes.
pub struct EchoSession {
    packets: mpsc::UnboundedReceiver<InboundPacket>,
}

/// Create a connected callback/session pair.
#[must_use]
pub fn echo_session() -> (Arc<EchoCallback>, EchoSession) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(EchoCallback { packets: tx }), EchoSession { packets: rx })
}

impl EchoSession {
    /// Answer packets until the transport's reader stops.
    pub async fn run(mut self, transport: &dyn Transport) {
        while let Some(packet) = self.packets.recv().await {
            match EchoAction::for_packet(packet.packet_type) {
                EchoAction::Respond(reply) => {
                    if let Err(error) = send_packet(transport, packet.kind, reply, &packet.payload).await {
                        warn!(%error, packet_type = %reply, "failed to send echo reply");
                    }
                }
                EchoAction::Close => {
                    if let Err(error) = transport.close().await {
                        warn!(%error, "failed to close transport");
                    }
                }
                EchoAction::Ignore => {
                    debug!(packet_type = %packet.packet_type, "ignoring packet");
                }
            }
        }
    }
}

async fn send_packet(
    transport: &dyn Transport,
    kind: MessageKind,
    packet_type: PacketType,
    payload: &[u8],
) -> Result<(), TransportError> {
    let mut writer = transport.next_writer(kind, packet_type)?;
    writer.write_all(payload)?;
    writer.close().await
}
