//! Notification interface consumed by a presentation layer.
//!
//! Callbacks are invoked directly from background I/O tasks. An observer
//! that needs a particular thread must marshal the call itself.

/// Receives transcript lines and lifecycle notices from a server or client.
///
/// Every method has a no-op default so observers only override what they
/// display.
pub trait ChatObserver: Send + Sync + 'static {
    /// A line for the visible transcript.
    fn on_message(&self, text: &str) {
        let _ = text;
    }

    /// A client identified itself (server side).
    fn on_client_joined(&self, name: &str) {
        let _ = name;
    }

    /// A registered client left, gracefully or not (server side).
    fn on_client_left(&self, name: &str) {
        let _ = name;
    }

    /// The client's connection failed unexpectedly.
    fn on_connection_lost(&self) {}

    /// The client session ended gracefully (local disconnect or server shutdown).
    fn on_disconnected(&self) {}

    /// The server is accepting connections on `port`.
    fn on_server_started(&self, port: u16) {
        let _ = port;
    }

    /// The server finished its shutdown.
    fn on_server_stopped(&self) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ChatObserver for NoopObserver {}
