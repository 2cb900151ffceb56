//! Decoder for a single inbound packet frame.

use std::io::{self, Read};

use bytes::Bytes;

use super::{PacketType, ParseError};
use crate::message::MessageKind;

/// A decoded view over exactly one inbound frame.
///
/// The decoder owns the frame bytes until [`PacketDecoder::close`] releases
/// them. Owners read the payload either through [`Read`] or by borrowing
/// [`PacketDecoder::payload`]; the transport closes the decoder once the
/// owner's callback returns.
#[derive(Debug)]
pub struct PacketDecoder {
    packet_type: PacketType,
    kind: MessageKind,
    payload: Bytes,
    position: usize,
}

impl PacketDecoder {
    /// Classify a frame and split off its payload.
    ///
    /// A leading byte at or above `'0'` marks a string-encoded packet whose
    /// type is the ASCII digit; anything lower is a binary-encoded type.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::EmptyFrame`] for a zero-length frame and
    /// [`ParseError::InvalidPacketType`] when the type is out of range.
    pub fn new(frame: Bytes) -> Result<Self, ParseError> {
        let Some(&header) = frame.first() else {
            return Err(ParseError::EmptyFrame);
        };
        let (kind, raw_type) = if header >= b'0' {
            (MessageKind::Text, header - b'0')
        } else {
            (MessageKind::Binary, header)
        };
        let packet_type = PacketType::try_from(raw_type).map_err(|_| ParseError::InvalidPacketType(header))?;
        Ok(Self {
            packet_type,
            kind,
            payload: frame.slice(1..),
            position: 0,
        })
    }

    /// Packet type carried in the frame header.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType { self.packet_type }

    /// Encoding the peer used for this packet.
    #[must_use]
    pub const fn message_kind(&self) -> MessageKind { self.kind }

    /// Full packet payload, independent of how much has been read.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Payload bytes not yet consumed through [`Read`].
    #[must_use]
    pub fn remaining(&self) -> &[u8] { self.payload.get(self.position..).unwrap_or_default() }

    /// Release the frame, returning how many unread payload bytes were
    /// discarded.
    #[must_use]
    pub fn close(self) -> usize { self.remaining().len() }
}

impl Read for PacketDecoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rest = self.remaining();
        let read = rest.read(buf)?;
        self.position += read;
        Ok(read)
    }
}
