//! Connection layer for the chat relay.
//!
//! Wraps one peer's byte stream in a read pump (accumulate, decode, dispatch
//! to a [`FrameHandler`]) and a write pump (drain a bounded queue of encoded
//! frames). Shared by the server and the client.

mod connection;
mod events;
mod handler;

pub use connection::{Connection, spawn_connection};
pub use events::{ChatObserver, NoopObserver};
pub use handler::{CloseReason, FrameHandler, HandlerFuture};

use std::fmt;

/// Capacity of each connection's outbound frame queue.
///
/// A broadcast never waits on a slow peer: once this many frames are
/// queued, further writes to that peer fail with [`ConnectionError::BufferFull`].
pub const SEND_BUFFER_SIZE: usize = 256;

/// Unique identity of one accepted or dialed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First group is enough to tell connections apart in logs.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

/// Errors produced when writing to a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("send buffer full")]
    BufferFull,

    #[error("protocol error: {0}")]
    Protocol(#[from] chatrelay_protocol::ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
