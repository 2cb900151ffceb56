//! Encoders that frame one outbound packet.

use std::io::{self, Write};

use super::PacketType;
use crate::transport::{
    TransportError,
    frame::{EncoderKind, FrameKind, OutboundFrame},
};

/// Single-use writer for one outbound packet.
///
/// The packet type header is written when the encoder is built; payload
/// bytes follow through [`Write`]. Nothing reaches the peer until
/// [`PacketEncoder::close`] hands the finished frame to the connection, and
/// closing consumes the encoder so it cannot be reused for another packet.
#[derive(Debug)]
pub struct PacketEncoder {
    packet_type: PacketType,
    encoder: EncoderKind,
    frame: OutboundFrame,
}

impl PacketEncoder {
    /// Build the encoder selected by `encoder` over a raw outbound frame.
    #[must_use]
    pub fn new(encoder: EncoderKind, frame: OutboundFrame, packet_type: PacketType) -> Self {
        match encoder {
            EncoderKind::String => Self::string(frame, packet_type),
            EncoderKind::Binary => Self::binary(frame, packet_type),
        }
    }

    /// String encoder: ASCII digit header, intended for text frames.
    #[must_use]
    pub fn string(mut frame: OutboundFrame, packet_type: PacketType) -> Self {
        frame.push(packet_type.string_byte());
        Self {
            packet_type,
            encoder: EncoderKind::String,
            frame,
        }
    }

    /// Binary encoder: raw type byte header, intended for binary frames.
    #[must_use]
    pub fn binary(mut frame: OutboundFrame, packet_type: PacketType) -> Self {
        frame.push(packet_type.binary_byte());
        Self {
            packet_type,
            encoder: EncoderKind::Binary,
            frame,
        }
    }

    /// Packet type written into the header.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType { self.packet_type }

    /// Which encoder produced the header.
    #[must_use]
    pub const fn encoder_kind(&self) -> EncoderKind { self.encoder }

    /// Frame opcode the packet will be sent with.
    #[must_use]
    pub const fn frame_kind(&self) -> FrameKind { self.frame.kind() }

    /// Bytes buffered so far, header included.
    #[must_use]
    pub fn buffered(&self) -> &[u8] { self.frame.bytes() }

    /// Finish the packet and send it as a single frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the connection closed
    /// while the packet was being written, [`TransportError::InvalidText`]
    /// if a text frame is not valid UTF-8, or the underlying send failure.
    pub async fn close(self) -> Result<(), TransportError> { self.frame.finish().await }
}

impl Write for PacketEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.frame.write(buf) }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}
