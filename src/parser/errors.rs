//! Error types for packet decoding.

use thiserror::Error;

/// Errors raised while decoding an inbound frame into a packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The frame carried no bytes, so there is no packet type to read.
    #[error("empty packet frame")]
    EmptyFrame,
    /// The packet type byte is outside the known range.
    #[error("invalid packet type {0}")]
    InvalidPacketType(u8),
}
