//! Relay server lifecycle.
//!
//! Binds a TCP port, runs one accept loop, and hands every accepted socket
//! to the session controller. Stopping sends the shutdown notice to every
//! open connection, closes them, and releases the port so the same server
//! can be started again. Accept errors back off before the next attempt.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chatrelay_connection::ChatObserver;
use chatrelay_protocol::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_PORT, SERVER_PREFIX};
use chatrelay_protocol::validation::{validate_buffer_size, validate_port};
use chatrelay_protocol::ValidationError;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::registry::ClientRegistry;
use crate::session::ServerSession;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to listen on.
    pub bind_addr: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Size of each connection's read buffer.
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ServerConfig {
    /// Builds a config from raw user input.
    pub fn parse(port: &str, buffer_size: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            port: validate_port(port)?,
            buffer_size: validate_buffer_size(buffer_size)?,
            ..Self::default()
        })
    }
}

/// State of one start/stop cycle.
struct Running {
    local_addr: SocketAddr,
    /// Stops the accept loop.
    accept_cancel: CancellationToken,
    /// Parent of every connection accepted during this run.
    conn_cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// The chat relay server.
///
/// Restartable: [`stop`](Self::stop) returns it to the stopped state and
/// [`start`](Self::start) may be called again.
pub struct RelayServer<O: ChatObserver> {
    config: ServerConfig,
    session: Arc<ServerSession<O>>,
    observer: Arc<O>,
    running: Mutex<Option<Running>>,
}

impl<O: ChatObserver> RelayServer<O> {
    pub fn new(config: ServerConfig, observer: O) -> Self {
        let observer = Arc::new(observer);
        let registry = Arc::new(ClientRegistry::new());
        Self {
            config,
            session: Arc::new(ServerSession::new(registry, Arc::clone(&observer))),
            observer,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn observer(&self) -> &Arc<O> {
        &self.observer
    }

    /// Starts listening on the configured port.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        self.start_on(self.config.port).await
    }

    /// Starts listening on `port`, overriding the configured one.
    pub async fn start_on(&self, port: u16) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = SocketAddr::new(self.config.bind_addr, port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                ServerError::PortInUse(port)
            } else {
                ServerError::Bind { port, source: e }
            }
        })?;
        let local_addr = listener.local_addr()?;

        let accept_cancel = CancellationToken::new();
        let conn_cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.session),
            self.config.buffer_size,
            accept_cancel.clone(),
            conn_cancel.clone(),
        ));

        *running = Some(Running {
            local_addr,
            accept_cancel,
            conn_cancel,
            accept_task,
        });

        tracing::info!(%local_addr, "relay server listening");
        self.observer.on_message(&format!(
            "{SERVER_PREFIX}: Started on port {}",
            local_addr.port()
        ));
        self.observer.on_server_started(local_addr.port());
        Ok(local_addr)
    }

    /// Stops the server.
    ///
    /// Stops accepting, sends the shutdown notice to every open connection
    /// (identified or not), closes them all and empties the registry.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(ServerError::NotRunning);
        };

        running.accept_cancel.cancel();
        if let Err(e) = running.accept_task.await {
            tracing::error!("accept loop panicked: {e}");
        }

        self.session.shutdown().await;
        running.conn_cancel.cancel();

        tracing::info!(local_addr = %running.local_addr, "relay server stopped");
        self.observer.on_message(&format!("{SERVER_PREFIX}: Stopped"));
        self.observer.on_server_stopped();
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Address the server is bound to, while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Listening port (0 if not running).
    pub async fn port(&self) -> u16 {
        self.local_addr().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Display names of registered clients, in join order.
    pub async fn client_names(&self) -> Vec<String> {
        self.session.registry().list().await
    }

    pub async fn client_count(&self) -> usize {
        self.session.registry().len().await
    }

    /// Open connections, including ones that have not identified yet.
    pub async fn connection_count(&self) -> usize {
        self.session.live_count().await
    }
}

/// Pause before retrying after the `errors`-th consecutive accept failure.
///
/// Doubles from 10 ms up to one second so a persistent error such as
/// running out of file descriptors does not spin the loop.
fn accept_backoff(errors: u32) -> Duration {
    let exp = errors.saturating_sub(1).min(7);
    (ACCEPT_BACKOFF_MIN * 2u32.pow(exp)).min(ACCEPT_BACKOFF_MAX)
}

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

async fn accept_loop<O: ChatObserver>(
    listener: TcpListener,
    session: Arc<ServerSession<O>>,
    buffer_size: usize,
    accept_cancel: CancellationToken,
    conn_cancel: CancellationToken,
) {
    let mut errors = 0u32;
    loop {
        tokio::select! {
            _ = accept_cancel.cancelled() => {
                tracing::debug!("accept loop stopping");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        errors = 0;
                        session.accept(stream, peer_addr, buffer_size, &conn_cancel).await;
                    }
                    Err(e) => {
                        errors = errors.saturating_add(1);
                        let delay = accept_backoff(errors);
                        tracing::error!(?delay, "accept error: {e}");
                        tokio::select! {
                            _ = accept_cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use chatrelay_connection::NoopObserver;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;

    fn loopback_config() -> ServerConfig {
        ServerConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[derive(Default)]
    struct Lifecycle {
        events: StdMutex<Vec<String>>,
    }

    impl ChatObserver for Lifecycle {
        fn on_message(&self, text: &str) {
            self.events.lock().unwrap().push(text.to_string());
        }

        fn on_server_started(&self, port: u16) {
            self.events.lock().unwrap().push(format!("started {port}"));
        }

        fn on_server_stopped(&self) {
            self.events.lock().unwrap().push("stopped".into());
        }
    }

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 9000);
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.bind_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn parse_config_from_input() {
        let config = ServerConfig::parse("9100", "2048").unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.buffer_size, 2048);

        assert!(ServerConfig::parse("0", "1024").is_err());
        assert!(ServerConfig::parse("9000", "0").is_err());
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let server = RelayServer::new(loopback_config(), NoopObserver);
        let addr = server.start().await.unwrap();
        assert!(addr.port() > 0);
        assert_eq!(server.port().await, addr.port());
        assert!(server.is_running().await);

        server.stop().await.unwrap();
        assert!(!server.is_running().await);
        assert_eq!(server.port().await, 0);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let server = RelayServer::new(loopback_config(), NoopObserver);
        server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyRunning)
        ));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_when_stopped_is_an_error() {
        let server = RelayServer::new(loopback_config(), NoopObserver);
        assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
    }

    #[tokio::test]
    async fn port_in_use_is_reported() {
        let first = RelayServer::new(loopback_config(), NoopObserver);
        let addr = first.start().await.unwrap();

        let second = RelayServer::new(loopback_config(), NoopObserver);
        let result = second.start_on(addr.port()).await;
        assert!(matches!(result, Err(ServerError::PortInUse(p)) if p == addr.port()));
        assert!(!second.is_running().await);

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn restart_on_same_port() {
        let server = RelayServer::new(loopback_config(), Lifecycle::default());
        let addr = server.start().await.unwrap();
        server.stop().await.unwrap();

        let again = server.start_on(addr.port()).await.unwrap();
        assert_eq!(again.port(), addr.port());
        server.stop().await.unwrap();

        let events = server.observer().events.lock().unwrap().clone();
        let started = format!("started {}", addr.port());
        assert_eq!(events.iter().filter(|e| **e == started).count(), 2);
        assert_eq!(events.iter().filter(|e| *e == "stopped").count(), 2);
        assert!(events.contains(&format!("[SERVER]: Started on port {}", addr.port())));
    }

    #[tokio::test]
    async fn stop_notifies_and_closes_clients() {
        let server = RelayServer::new(loopback_config(), NoopObserver);
        let addr = server.start().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"AliceCONNECT~").await.unwrap();

        let join = b"[SERVER]: Alice connected!~";
        let mut buf = vec![0u8; join.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, join);

        server.stop().await.unwrap();

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rest, b"[SERVER]: Server is closed!DISCONNECTED_SERVER~");
        assert_eq!(server.client_count().await, 0);
    }

    #[tokio::test]
    async fn stop_closes_unidentified_connections() {
        let server = RelayServer::new(loopback_config(), NoopObserver);
        let addr = server.start().await.unwrap();

        let mut silent = TcpStream::connect(addr).await.unwrap();
        for _ in 0..100 {
            if server.connection_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.connection_count().await, 1);

        server.stop().await.unwrap();

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), silent.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rest, b"[SERVER]: Server is closed!DISCONNECTED_SERVER~");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn connect_racing_stop_is_not_left_registered() {
        const PEERS: usize = 16;

        let server = RelayServer::new(loopback_config(), NoopObserver);
        let addr = server.start().await.unwrap();

        let mut peers = Vec::new();
        for _ in 0..PEERS {
            peers.push(TcpStream::connect(addr).await.unwrap());
        }
        for _ in 0..300 {
            if server.connection_count().await == PEERS {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.connection_count().await, PEERS);

        let writers: Vec<_> = peers
            .into_iter()
            .enumerate()
            .map(|(i, mut peer)| {
                tokio::spawn(async move {
                    // The server may already have closed the socket.
                    let _ = peer.write_all(format!("User{i}CONNECT~").as_bytes()).await;
                    peer
                })
            })
            .collect();

        server.stop().await.unwrap();
        assert_eq!(server.client_count().await, 0);

        for writer in writers {
            drop(writer.await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.client_count().await, 0);
    }

    #[test]
    fn accept_backoff_doubles_up_to_a_cap() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(4), Duration::from_millis(80));
        assert_eq!(accept_backoff(8), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
    }
}
