//! WebSocket transport for an Engine.IO style realtime protocol.
//!
//! The crate upgrades an inbound HTTP exchange to a WebSocket connection and
//! adapts it to the [`transport::Transport`] contract consumed by a protocol
//! engine: one background reader per connection decodes inbound frames into
//! packets for the owner's [`transport::TransportCallback`], while owners
//! open single-use packet writers whose framing follows the logical
//! [`message::MessageKind`].
//!
//! The [`server`] module hosts a small echo owner and the listener used by
//! the `eio-ws-server` binary.

pub mod message;
pub mod parser;
pub mod server;
pub mod transport;
pub mod websocket;

pub use message::MessageKind;
pub use parser::{PacketDecoder, PacketEncoder, PacketType, ParseError};
pub use transport::{Transport, TransportCallback, TransportError};
pub use websocket::{Exchange, HandshakeError, LifecycleState, Upgrader, WebSocketTransport};
