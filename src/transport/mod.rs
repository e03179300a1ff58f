//! Transport seams: message traits plus the framed-TCP and in-memory
//! implementations.
//!
//! The protocol only assumes an ordered reliable bidirectional message
//! channel. Any transport with those properties can be bound by implementing
//! `ServerConnection` on the server side and `ClientChannel` on the client
//! side.

mod frame;
mod memory;
mod tcp;

use std::time::Duration;

use thiserror::Error;

use crate::proto::{ClientToServer, ProtoError, ServerToClient};

pub use frame::{FRAME_HEADER_LEN, FrameError, FrameReader, FrameWriter, encode_frame};
pub use memory::{MemoryClientChannel, MemoryConnection, MemoryReader, MemoryWriter, memory_link};
pub use tcp::{TcpClientChannel, TcpConnection, TcpReader, TcpWriter};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error("channel closed")]
    Closed,
}

/// Server-side inbound half of one session.
pub trait MessageReader: Send {
    /// Blocks for the next message. `Ok(None)` means the peer closed cleanly.
    fn read_message(&mut self) -> Result<Option<ClientToServer>, TransportError>;
}

/// Server-side outbound half of one session.
pub trait MessageWriter {
    fn write_message(&mut self, msg: &ServerToClient) -> Result<(), TransportError>;
}

/// One accepted server-side connection, splittable into its two halves so a
/// reader thread can run independently of the session loop.
pub trait ServerConnection {
    type Reader: MessageReader + 'static;
    type Writer: MessageWriter;

    fn split(self) -> Result<(Self::Reader, Self::Writer), TransportError>;

    /// Peer label for logs.
    fn peer(&self) -> String;
}

/// One delivery on the client side of the channel.
///
/// Bytes that arrive on an intact frame but fail message decoding are
/// surfaced as `Malformed` so the engine can route them through the
/// application's decode-error hook instead of tearing the channel down.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    Message(ServerToClient),
    Malformed(String),
}

/// Client endpoint of a session.
pub trait ClientChannel {
    fn send(&mut self, msg: &ClientToServer) -> Result<(), TransportError>;

    /// Non-blocking poll for the next delivery.
    fn poll(&mut self) -> Result<Option<Incoming>, TransportError>;

    /// Blocks up to `timeout` for the next delivery.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Incoming>, TransportError>;
}
