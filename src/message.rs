//! Logical message kinds understood by the transport layer.
//!
//! The owning protocol engine tags every outbound packet as either text or
//! binary. The WebSocket adapter maps that tag onto a frame opcode and a
//! matching packet encoder; see [`crate::transport::frame::select_framing`].

use std::fmt;

/// Kind of a logical message carried by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageKind {
    /// UTF-8 text payload. Used when the caller does not ask for binary.
    #[default]
    Text,
    /// Opaque binary payload.
    Binary,
}

impl MessageKind {
    /// Returns `true` for [`MessageKind::Binary`].
    #[must_use]
    pub const fn is_binary(self) -> bool { matches!(self, Self::Binary) }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Binary => f.write_str("binary"),
        }
    }
}
