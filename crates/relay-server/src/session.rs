//! Server-side session controller.
//!
//! Each accepted socket moves `Accepted -> Active -> Closed`: it becomes
//! active when its read pump starts and closed when the pump exits. Decoded
//! frames drive the registry and the broadcaster:
//!
//! | Frame              | Effect                                                        |
//! |--------------------|---------------------------------------------------------------|
//! | Connect            | register, broadcast join notice                               |
//! | Chat               | relay the line to everyone, sender included                   |
//! | ClientDisconnect   | relay farewell to the others, ack the sender, deregister, close |
//! | I/O failure / EOF  | deregister and announce the loss (if the client had joined)   |
//!
//! A server stop sends the shutdown notice to every live connection,
//! including ones that have not identified yet.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chatrelay_connection::{
    ChatObserver, CloseReason, Connection, ConnectionId, FrameHandler, HandlerFuture,
    spawn_connection,
};
use chatrelay_protocol::constants::{
    SERVER_CLOSED_NOTICE, SERVER_PREFIX, join_notice, lost_notice,
};
use chatrelay_protocol::{Frame, FrameKind, encode_frame};
use futures_util::future::join_all;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::registry::{ClientRegistry, RegistryError};

pub(crate) struct ServerSession<O: ChatObserver> {
    registry: Arc<ClientRegistry>,
    broadcaster: Broadcaster,
    observer: Arc<O>,
    /// Every active connection, identified or not.
    live: Mutex<HashMap<ConnectionId, Connection>>,
}

impl<O: ChatObserver> ServerSession<O> {
    pub(crate) fn new(registry: Arc<ClientRegistry>, observer: Arc<O>) -> Self {
        Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            observer,
            live: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub(crate) async fn live_count(&self) -> usize {
        self.live.lock().await.len()
    }

    /// Starts a session for a freshly accepted socket.
    pub(crate) async fn accept(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
        buffer_size: usize,
        parent: &CancellationToken,
    ) -> Connection {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer_addr, "set_nodelay failed: {e}");
        }
        info!(%peer_addr, "client connected");
        self.observer
            .on_message(&format!("{SERVER_PREFIX}: Client connected!"));

        self.attach(stream, peer_addr.to_string(), buffer_size, parent)
            .await
    }

    /// Spawns the pumps for `stream` and records the connection as live.
    ///
    /// The live map stays locked across the spawn, so `on_closed` cannot
    /// remove the entry before it is inserted.
    pub(crate) async fn attach<S>(
        self: &Arc<Self>,
        stream: S,
        peer: String,
        buffer_size: usize,
        parent: &CancellationToken,
    ) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut live = self.live.lock().await;
        let conn = spawn_connection(stream, peer, buffer_size, Arc::clone(self), parent);
        live.insert(conn.id(), conn.clone());
        conn
    }

    /// Sends the shutdown notice to every live connection, identified or
    /// not, closes them all and empties the registry.
    ///
    /// Returns how many connections the notice was queued to.
    pub(crate) async fn shutdown(&self) -> usize {
        let connections: Vec<Connection> = self.live.lock().await.values().cloned().collect();

        let mut notified = 0;
        match encode_frame(&Frame::server_shutdown(SERVER_CLOSED_NOTICE)) {
            Ok(notice) => {
                for conn in &connections {
                    match conn.write(notice.clone()) {
                        Ok(()) => notified += 1,
                        Err(e) => debug!(conn = %conn.id(), "shutdown notice not queued: {e}"),
                    }
                }
            }
            Err(e) => warn!("cannot encode shutdown notice: {e}"),
        }

        let flushed = join_all(connections.iter().map(|conn| conn.close_and_wait())).await;
        let timed_out = flushed.iter().filter(|ok| !**ok).count();
        if timed_out > 0 {
            warn!(timed_out, "some connections did not drain before close");
        }

        // Every connection is closed now, so the registry refuses late joins.
        let dropped = self.registry.drain().await;
        info!(
            notified,
            failed = connections.len() - notified,
            registered = dropped.len(),
            "shutdown notice sent"
        );
        notified
    }

    async fn relay(&self, frame: Frame, exclude: Option<ConnectionId>) {
        if let Err(e) = self.broadcaster.broadcast_frame(&frame, exclude).await {
            warn!("cannot relay frame: {e}");
        }
    }

    async fn handle_connect(&self, conn: &Connection, name: String) {
        match self.registry.add(conn.clone(), name.clone()).await {
            Ok(()) => {}
            Err(RegistryError::DuplicateConnection(id)) => {
                warn!(conn = %id, %name, "ignoring repeated connect");
                return;
            }
            Err(RegistryError::Closed(id)) => {
                debug!(conn = %id, %name, "connect on a closed connection ignored");
                return;
            }
            Err(e) => {
                warn!(conn = %conn.id(), "cannot register client: {e}");
                return;
            }
        }

        info!(conn = %conn.id(), %name, "client joined");
        self.observer.on_client_joined(&name);
        self.relay(Frame::relay(join_notice(&name)), None).await;
    }

    async fn handle_chat(&self, line: String) {
        self.observer.on_message(&line);
        self.relay(Frame::relay(line), None).await;
    }

    async fn handle_disconnect(&self, conn: &Connection, farewell: String) {
        let id = conn.id();
        let ack = match encode_frame(&Frame::client_disconnect("")) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("cannot encode disconnect ack: {e}");
                conn.close();
                return;
            }
        };

        if self.registry.contains(id).await {
            self.observer.on_message(&farewell);
            self.relay(Frame::relay(farewell), Some(id)).await;
            if let Err(e) = self.broadcaster.send_to(id, ack).await {
                debug!(conn = %id, "disconnect ack not delivered: {e}");
            }
            if let Ok(entry) = self.registry.remove(id).await {
                info!(conn = %id, name = %entry.name, "client left");
                self.observer.on_client_left(&entry.name);
            }
        } else {
            debug!(conn = %id, "disconnect from unidentified connection");
            if let Err(e) = conn.write(ack) {
                debug!(conn = %id, "disconnect ack not delivered: {e}");
            }
        }

        conn.close();
    }

    /// Deregisters a connection that ended without a disconnect frame.
    async fn handle_lost(&self, id: ConnectionId, reason: &CloseReason) {
        let entry = match self.registry.remove(id).await {
            Ok(entry) => entry,
            Err(_) => {
                debug!(conn = %id, %reason, "unidentified connection dropped");
                return;
            }
        };

        info!(conn = %id, name = %entry.name, %reason, "client connection lost");
        let notice = lost_notice(&entry.name);
        self.observer.on_message(&notice);
        self.observer.on_client_left(&entry.name);
        self.relay(Frame::relay(notice), None).await;
    }
}

impl<O: ChatObserver> FrameHandler for ServerSession<O> {
    fn on_frame(&self, conn: Connection, frame: Frame) -> HandlerFuture<'_> {
        Box::pin(async move {
            match frame.kind {
                FrameKind::Connect => self.handle_connect(&conn, frame.payload).await,
                FrameKind::Chat => self.handle_chat(frame.payload).await,
                FrameKind::ClientDisconnect => self.handle_disconnect(&conn, frame.payload).await,
                FrameKind::Relay if frame.payload.is_empty() => {
                    debug!(conn = %conn.id(), "ignoring empty frame");
                }
                FrameKind::Relay => {
                    // Untagged input is relayed like a chat line.
                    warn!(conn = %conn.id(), "untagged frame from client, relaying as chat");
                    self.handle_chat(frame.payload).await;
                }
                FrameKind::ServerShutdown => {
                    warn!(conn = %conn.id(), "client sent a server shutdown frame, ignoring");
                }
            }
        })
    }

    fn on_closed(&self, conn: Connection, reason: CloseReason) -> HandlerFuture<'_> {
        Box::pin(async move {
            let id = conn.id();
            self.live.lock().await.remove(&id);

            if reason.is_implicit() {
                self.handle_lost(id, &reason).await;
            } else if let Ok(entry) = self.registry.remove(id).await {
                // Closed locally while still registered, e.g. a shutdown race.
                debug!(conn = %id, name = %entry.name, "deregistered on local close");
            }
        })
    }
}
