//! Raw outbound frames and the framing mode chosen for each message kind.

use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
};

use async_trait::async_trait;

use super::TransportError;
use crate::message::MessageKind;

/// Opcode of a data frame on the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Text frame; payload must be UTF-8.
    Text,
    /// Binary frame.
    Binary,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Binary => f.write_str("binary"),
        }
    }
}

/// Packet encoder flavour paired with a frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    /// ASCII digit packet header.
    String,
    /// Raw byte packet header.
    Binary,
}

/// Frame opcode and encoder used for one outbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Opcode requested from the connection.
    pub frame: FrameKind,
    /// Encoder wrapped around the frame.
    pub encoder: EncoderKind,
}

/// Map a logical message kind to its framing.
///
/// Binary messages travel as binary frames with the binary encoder;
/// everything else travels as text frames with the string encoder.
#[must_use]
pub const fn select_framing(kind: MessageKind) -> Framing {
    match kind {
        MessageKind::Binary => Framing {
            frame: FrameKind::Binary,
            encoder: EncoderKind::Binary,
        },
        MessageKind::Text => Framing {
            frame: FrameKind::Text,
            encoder: EncoderKind::String,
        },
    }
}

/// Destination for finished outbound frames.
#[async_trait]
pub(crate) trait FrameSink: Send + Sync {
    async fn send_frame(&self, kind: FrameKind, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// One outbound frame being assembled in memory.
pub struct OutboundFrame {
    kind: FrameKind,
    bytes: Vec<u8>,
    sink: Arc<dyn FrameSink>,
}

impl OutboundFrame {
    pub(crate) fn new(kind: FrameKind, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            kind,
            bytes: Vec::new(),
            sink,
        }
    }

    /// Opcode this frame will be sent with.
    #[must_use]
    pub const fn kind(&self) -> FrameKind { self.kind }

    /// Bytes buffered so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] { &self.bytes }

    pub(crate) fn push(&mut self, byte: u8) { self.bytes.push(byte); }

    /// Send the buffered bytes as a single frame.
    ///
    /// # Errors
    ///
    /// Propagates the connection's send failure.
    pub async fn finish(self) -> Result<(), TransportError> {
        let Self { kind, bytes, sink } = self;
        sink.send_frame(kind, bytes).await
    }
}

impl fmt::Debug for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundFrame")
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl Write for OutboundFrame {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory frame sink for encoder tests.

    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{FrameKind, FrameSink};
    use crate::transport::TransportError;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        frames: Mutex<Vec<(FrameKind, Vec<u8>)>>,
    }

    impl RecordingSink {
        pub(crate) fn new() -> Arc<Self> { Arc::new(Self::default()) }

        pub(crate) fn frames(&self) -> Vec<(FrameKind, Vec<u8>)> {
            match self.frames.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, kind: FrameKind, bytes: Vec<u8>) -> Result<(), TransportError> {
            let mut guard = match self.frames.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.push((kind, bytes));
            Ok(())
        }
    }
}
