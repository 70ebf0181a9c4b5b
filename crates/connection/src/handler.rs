//! Handler trait for frames decoded by a connection's read pump.
//!
//! Implementors hold the session logic (registry updates, broadcasts,
//! transcript notices) while the connection handles buffering and I/O.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chatrelay_protocol::Frame;

use crate::connection::Connection;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Why a connection's read pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side of the stream.
    PeerClosed,
    /// Closed locally via [`Connection::close`].
    Local,
    /// A read, write or decode failure.
    Error(String),
}

impl CloseReason {
    /// `true` when the connection ended without a local close request.
    pub fn is_implicit(&self) -> bool {
        !matches!(self, CloseReason::Local)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed the connection"),
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::Error(e) => write!(f, "connection error: {e}"),
        }
    }
}

/// Receives the lifecycle of one connection.
///
/// Methods are awaited from the read pump in stream order, so a handler
/// sees frames exactly in the order their bytes arrived. `on_closed` is
/// called exactly once, after the last frame.
pub trait FrameHandler: Send + Sync + 'static {
    /// Called once when the read pump starts.
    fn on_open(&self, conn: Connection) -> HandlerFuture<'_> {
        let _ = conn;
        Box::pin(async {})
    }

    /// Called for every decoded frame.
    fn on_frame(&self, conn: Connection, frame: Frame) -> HandlerFuture<'_>;

    /// Called when the read pump exits.
    fn on_closed(&self, conn: Connection, reason: CloseReason) -> HandlerFuture<'_>;
}
