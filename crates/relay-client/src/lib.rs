//! Client side of the chat relay.
//!
//! [`ChatClient`] dials a relay server, identifies with a display name,
//! sends chat lines and reports everything it receives to a
//! [`ChatObserver`](chatrelay_connection::ChatObserver).

mod client;
pub mod types;

pub use client::ChatClient;
pub use types::{ClientSettings, ClientState};

use std::net::SocketAddr;

use chatrelay_connection::ConnectionError;
use chatrelay_protocol::ValidationError;

/// Errors produced by the chat client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    InvalidInput(#[from] ValidationError),

    #[error("cannot connect to {addr}: {source}")]
    ConnectFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {0} timed out")]
    Timeout(SocketAddr),

    #[error("already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(#[from] ConnectionError),
}
