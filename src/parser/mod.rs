//! Engine.IO packet framing used over WebSocket frames.
//!
//! One WebSocket frame carries exactly one packet. The first byte encodes
//! the packet type, either as an ASCII digit (string encoding, carried in
//! text frames) or as a raw byte (binary encoding, carried in binary
//! frames); the remaining bytes are the packet payload.
//!
//! The transport layer only selects which encoder to build and releases
//! decoders once the owner has consumed them; it never inspects payloads.

mod decoder;
mod encoder;
mod errors;

use std::fmt;

pub use decoder::PacketDecoder;
pub use encoder::PacketEncoder;
pub use errors::ParseError;

/// Engine.IO packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Sent by the server when a new session opens.
    Open = 0,
    /// Requests the session to close.
    Close = 1,
    /// Heartbeat probe.
    Ping = 2,
    /// Heartbeat answer.
    Pong = 3,
    /// Application message.
    Message = 4,
    /// Transport upgrade confirmation.
    Upgrade = 5,
    /// No-op, used to flush pending polls.
    Noop = 6,
}

impl PacketType {
    /// Header byte used by the string encoding (`'0'` + type).
    #[must_use]
    pub const fn string_byte(self) -> u8 { b'0' + self as u8 }

    /// Header byte used by the binary encoding.
    #[must_use]
    pub const fn binary_byte(self) -> u8 { self as u8 }
}

impl TryFrom<u8> for PacketType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::Close),
            2 => Ok(Self::Ping),
            3 => Ok(Self::Pong),
            4 => Ok(Self::Message),
            5 => Ok(Self::Upgrade),
            6 => Ok(Self::Noop),
            other => Err(ParseError::InvalidPacketType(other)),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Message => "message",
            Self::Upgrade => "upgrade",
            Self::Noop => "noop",
        };
        f.write_str(name)
    }
}
