//! TCP chat relay server.
//!
//! Accepts any number of clients, tracks the ones that have identified
//! themselves in a [`ClientRegistry`], and relays their chat lines to every
//! registered client through a [`Broadcaster`]. Lifecycle events are reported
//! to a [`ChatObserver`](chatrelay_connection::ChatObserver).

mod broadcast;
mod registry;
mod server;
mod session;

pub use broadcast::{Broadcaster, DeliveryReport, SendError};
pub use registry::{ClientRegistry, RegistryEntry, RegistryError};
pub use server::{RelayServer, ServerConfig};

use chatrelay_protocol::ValidationError;

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    InvalidInput(#[from] ValidationError),

    #[error("port {0} is already in use")]
    PortInUse(u16),

    #[error("cannot bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server already running")]
    AlreadyRunning,

    #[error("server not running")]
    NotRunning,
}
