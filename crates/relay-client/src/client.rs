//! Client session controller.
//!
//! Every successful [`ChatClient::connect`] creates a fresh connection with
//! its own state cell, so a late close notification from an earlier session
//! can never change the state of the current one.

use std::sync::Arc;

use chatrelay_connection::{
    ChatObserver, CloseReason, Connection, FrameHandler, HandlerFuture, spawn_connection,
};
use chatrelay_protocol::constants::{
    CLIENT_PREFIX, CLOSE_TIMEOUT, CONNECT_TIMEOUT, chat_line, farewell,
};
use chatrelay_protocol::validation::validate_message;
use chatrelay_protocol::{Frame, FrameKind};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ClientError;
use crate::types::{ClientSettings, ClientState};

type StateCell = Arc<watch::Sender<ClientState>>;

/// Moves `cell` from a state accepted by `from` to `to`.
///
/// Returns `false`, leaving the state untouched, if `from` rejects it.
fn transition(
    cell: &watch::Sender<ClientState>,
    from: fn(ClientState) -> bool,
    to: ClientState,
) -> bool {
    cell.send_if_modified(|state| {
        if from(*state) {
            *state = to;
            true
        } else {
            false
        }
    })
}

struct Session {
    name: String,
    connection: Connection,
    state: StateCell,
}

/// A chat relay client.
pub struct ChatClient<O: ChatObserver> {
    observer: Arc<O>,
    session: Mutex<Option<Session>>,
    shutdown: CancellationToken,
}

impl<O: ChatObserver> ChatClient<O> {
    pub fn new(observer: O) -> Self {
        Self {
            observer: Arc::new(observer),
            session: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn observer(&self) -> &Arc<O> {
        &self.observer
    }

    /// Dials the server and identifies with `settings.name`.
    pub async fn connect(&self, settings: ClientSettings) -> Result<(), ClientError> {
        settings.validate()?;

        let mut current = self.session.lock().await;
        if current.as_ref().is_some_and(|s| s.state.borrow().is_live()) {
            return Err(ClientError::AlreadyConnected);
        }

        self.observer
            .on_message(&format!("{CLIENT_PREFIX}: Connecting..."));

        let addr = settings.socket_addr();
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(%addr, "connect failed: {e}");
                self.observer
                    .on_message(&format!("{CLIENT_PREFIX}: Can't connect to the server!"));
                return Err(ClientError::ConnectFailure { addr, source: e });
            }
            Err(_) => {
                warn!(%addr, "connect timed out");
                self.observer
                    .on_message(&format!("{CLIENT_PREFIX}: Can't connect to the server!"));
                return Err(ClientError::Timeout(addr));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%addr, "set_nodelay failed: {e}");
        }

        let (state, _) = watch::channel(ClientState::Connecting);
        let state = Arc::new(state);
        let handler = Arc::new(ClientSession {
            observer: Arc::clone(&self.observer),
            state: Arc::clone(&state),
        });
        let connection = spawn_connection(
            stream,
            addr.to_string(),
            settings.buffer_size,
            handler,
            &self.shutdown,
        );

        if let Err(e) = connection.write_frame(&Frame::connect(settings.name.as_str())) {
            warn!(%addr, "cannot send connect frame: {e}");
            state.send_replace(ClientState::Closed);
            connection.close_and_wait().await;
            return Err(ClientError::Send(e));
        }

        // The read pump may already have seen the server go away.
        if !transition(&state, |s| s == ClientState::Connecting, ClientState::Active) {
            return Err(ClientError::NotConnected);
        }

        info!(%addr, name = %settings.name, conn = %connection.id(), "connected to relay");
        *current = Some(Session {
            name: settings.name,
            connection,
            state,
        });
        Ok(())
    }

    /// Sends one chat line as `"<name>: <text>"`.
    pub async fn send_message(&self, text: &str) -> Result<(), ClientError> {
        let text = validate_message(text)?;

        let current = self.session.lock().await;
        let session = current
            .as_ref()
            .filter(|s| *s.state.borrow() == ClientState::Active)
            .ok_or(ClientError::NotConnected)?;

        session
            .connection
            .write_frame(&Frame::chat(chat_line(&session.name, text)))?;
        Ok(())
    }

    /// Says goodbye and closes the connection.
    ///
    /// The farewell is best effort: the session ends up `Closed` even if it
    /// could not be written.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let current = self.session.lock().await;
        let session = current.as_ref().ok_or(ClientError::NotConnected)?;
        if !transition(
            &session.state,
            |s| s == ClientState::Active,
            ClientState::Disconnecting,
        ) {
            return Err(ClientError::NotConnected);
        }

        let conn = &session.connection;
        match conn.write_frame(&Frame::client_disconnect(farewell(&session.name))) {
            Ok(()) => {
                // The handler closes the connection once the ack arrives.
                if tokio::time::timeout(CLOSE_TIMEOUT, conn.closed()).await.is_err() {
                    debug!(conn = %conn.id(), "no disconnect ack, closing anyway");
                }
            }
            Err(e) => debug!(conn = %conn.id(), "farewell not sent: {e}"),
        }
        conn.close_and_wait().await;

        session.state.send_replace(ClientState::Closed);
        info!(conn = %conn.id(), "disconnected from relay");
        self.observer
            .on_message(&format!("{CLIENT_PREFIX}: Disconnected"));
        self.observer.on_disconnected();
        Ok(())
    }

    /// State of the current session (`Idle` before the first connect).
    pub async fn state(&self) -> ClientState {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| *s.state.borrow())
            .unwrap_or(ClientState::Idle)
    }

    /// Watches the state of the current session.
    pub async fn subscribe_state(&self) -> Option<watch::Receiver<ClientState>> {
        self.session.lock().await.as_ref().map(|s| s.state.subscribe())
    }

    /// Display name of the current session.
    pub async fn name(&self) -> Option<String> {
        self.session.lock().await.as_ref().map(|s| s.name.clone())
    }
}

impl<O: ChatObserver> Drop for ChatClient<O> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Frame handler for one client connection.
struct ClientSession<O: ChatObserver> {
    observer: Arc<O>,
    state: StateCell,
}

impl<O: ChatObserver> FrameHandler for ClientSession<O> {
    fn on_frame(&self, conn: Connection, frame: Frame) -> HandlerFuture<'_> {
        Box::pin(async move {
            match frame.kind {
                FrameKind::Relay => {
                    if !frame.payload.is_empty() {
                        self.observer.on_message(&frame.payload);
                    }
                }
                // Relayed text that happens to end in a tag word.
                FrameKind::Connect | FrameKind::Chat => {
                    self.observer.on_message(&frame.body());
                }
                FrameKind::ServerShutdown => {
                    if !frame.payload.is_empty() {
                        self.observer.on_message(&frame.payload);
                    }
                    if transition(
                        &self.state,
                        ClientState::can_be_ended_by_peer,
                        ClientState::Closed,
                    ) {
                        info!(conn = %conn.id(), "server shut down");
                        conn.close();
                        self.observer.on_disconnected();
                    }
                }
                FrameKind::ClientDisconnect => {
                    if *self.state.borrow() == ClientState::Disconnecting {
                        debug!(conn = %conn.id(), "disconnect acknowledged");
                        conn.close();
                    } else if !frame.payload.is_empty() {
                        self.observer.on_message(&frame.payload);
                    }
                }
            }
        })
    }

    fn on_closed(&self, conn: Connection, reason: CloseReason) -> HandlerFuture<'_> {
        Box::pin(async move {
            if transition(
                &self.state,
                ClientState::can_be_ended_by_peer,
                ClientState::Closed,
            ) {
                warn!(conn = %conn.id(), %reason, "connection to relay lost");
                self.observer
                    .on_message(&format!("{CLIENT_PREFIX}: Connection lost!"));
                self.observer.on_connection_lost();
            }
        })
    }
}
