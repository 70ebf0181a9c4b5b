fn main() {
    println!("Run `cargo test -p relay-scenarios` to execute end-to-end relay scenarios.");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::BytesMut;
    use chatrelay_client::{ChatClient, ClientSettings, ClientState};
    use chatrelay_connection::{ChatObserver, NoopObserver};
    use chatrelay_protocol::{Frame, FrameCodec};
    use chatrelay_server::{RelayServer, ServerConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_util::codec::Decoder;

    const WAIT: Duration = Duration::from_secs(3);

    fn loopback() -> ServerConfig {
        ServerConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..ServerConfig::default()
        }
    }

    /// A client speaking the wire protocol by hand.
    struct RawPeer {
        stream: TcpStream,
        buf: BytesMut,
        codec: FrameCodec,
    }

    impl RawPeer {
        async fn dial(addr: SocketAddr) -> Self {
            Self {
                stream: TcpStream::connect(addr).await.unwrap(),
                buf: BytesMut::new(),
                codec: FrameCodec::new(),
            }
        }

        /// Dials and identifies, consuming the own join notice.
        async fn join(addr: SocketAddr, name: &str) -> Self {
            let mut peer = Self::dial(addr).await;
            peer.send(format!("{name}CONNECT~").as_bytes()).await;
            assert_eq!(
                peer.recv().await,
                Frame::relay(format!("[SERVER]: {name} connected!"))
            );
            peer
        }

        async fn send(&mut self, raw: &[u8]) {
            self.stream.write_all(raw).await.unwrap();
        }

        /// Next frame, or `None` once the server closed the stream.
        async fn next(&mut self) -> Option<Frame> {
            loop {
                if let Some(frame) = self.codec.decode(&mut self.buf).unwrap() {
                    return Some(frame);
                }
                let mut chunk = [0u8; 512];
                let n = tokio::time::timeout(WAIT, self.stream.read(&mut chunk))
                    .await
                    .expect("timed out waiting for the server")
                    .unwrap();
                if n == 0 {
                    return None;
                }
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }

        async fn recv(&mut self) -> Frame {
            self.next().await.expect("server closed the stream")
        }

        async fn recv_until(&mut self, want: &Frame) {
            while self.recv().await != *want {}
        }

        async fn expect_closed(&mut self) {
            assert_eq!(self.next().await, None);
        }
    }

    #[derive(Default)]
    struct Transcript {
        lines: Mutex<Vec<String>>,
    }

    impl Transcript {
        fn has(&self, line: &str) -> bool {
            self.lines.lock().unwrap().iter().any(|l| l == line)
        }
    }

    impl ChatObserver for Transcript {
        fn on_message(&self, text: &str) {
            self.lines.lock().unwrap().push(text.to_string());
        }
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..300 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn settings(name: &str, addr: SocketAddr) -> ClientSettings {
        ClientSettings::parse(name, "127.0.0.1", &addr.port().to_string(), "1024").unwrap()
    }

    #[tokio::test]
    async fn join_chat_leave_on_the_wire() {
        let server = RelayServer::new(loopback(), Transcript::default());
        let addr = server.start().await.unwrap();

        let mut bob = RawPeer::join(addr, "Bob").await;
        let mut alice = RawPeer::join(addr, "Alice").await;
        assert_eq!(bob.recv().await, Frame::relay("[SERVER]: Alice connected!"));
        assert_eq!(server.client_names().await, vec!["Bob", "Alice"]);

        alice.send(b"Alice: helloMESSAGE~").await;
        assert_eq!(alice.recv().await, Frame::relay("Alice: hello"));
        assert_eq!(bob.recv().await, Frame::relay("Alice: hello"));

        alice
            .send(b"Alice: is disconnected!DISCONNECTED_CLIENT~")
            .await;
        assert_eq!(bob.recv().await, Frame::relay("Alice: is disconnected!"));
        assert_eq!(alice.recv().await, Frame::client_disconnect(""));
        alice.expect_closed().await;
        assert_eq!(server.client_names().await, vec!["Bob"]);

        let observer = server.observer();
        assert!(observer.has("[SERVER]: Client connected!"));
        assert!(observer.has("Alice: hello"));
        assert!(observer.has("Alice: is disconnected!"));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn connect_then_disconnect_in_one_write() {
        let server = RelayServer::new(loopback(), NoopObserver);
        let addr = server.start().await.unwrap();
        let mut watcher = RawPeer::join(addr, "Watcher").await;

        let mut carol = RawPeer::dial(addr).await;
        carol
            .send(b"CarolCONNECT~Carol: is disconnected!DISCONNECTED_CLIENT~")
            .await;

        assert_eq!(
            watcher.recv().await,
            Frame::relay("[SERVER]: Carol connected!")
        );
        assert_eq!(watcher.recv().await, Frame::relay("Carol: is disconnected!"));
        carol.recv_until(&Frame::client_disconnect("")).await;
        carol.expect_closed().await;
        assert_eq!(server.client_names().await, vec!["Watcher"]);

        server.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_connects_all_register() {
        const CLIENTS: usize = 32;

        let server = RelayServer::new(loopback(), NoopObserver);
        let addr = server.start().await.unwrap();

        let peers = futures_util::future::join_all((0..CLIENTS).map(|i| async move {
            let mut peer = RawPeer::dial(addr).await;
            peer.send(format!("User{i}CONNECT~").as_bytes()).await;
            peer
        }))
        .await;

        eventually(|| async { server.client_count().await == CLIENTS }).await;

        let names: BTreeSet<String> = server.client_names().await.into_iter().collect();
        let expected: BTreeSet<String> = (0..CLIENTS).map(|i| format!("User{i}")).collect();
        assert_eq!(names, expected);

        drop(peers);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn sender_order_is_preserved_per_receiver() {
        let server = RelayServer::new(loopback(), NoopObserver);
        let addr = server.start().await.unwrap();

        let mut bob = RawPeer::join(addr, "Bob").await;
        let mut alice = RawPeer::join(addr, "Alice").await;
        bob.recv().await;

        let mut burst = Vec::new();
        for i in 0..50 {
            burst.extend_from_slice(format!("Alice: line {i}MESSAGE~").as_bytes());
        }
        alice.send(&burst).await;

        for i in 0..50 {
            assert_eq!(bob.recv().await, Frame::relay(format!("Alice: line {i}")));
        }

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_client_does_not_disturb_the_others() {
        let server = RelayServer::new(loopback(), NoopObserver);
        let addr = server.start().await.unwrap();

        let mut a = RawPeer::join(addr, "A").await;
        let mut b = RawPeer::join(addr, "B").await;
        a.recv().await;
        let c = RawPeer::join(addr, "C").await;
        a.recv().await;
        b.recv().await;

        drop(c);
        a.send(b"A: still hereMESSAGE~").await;

        b.recv_until(&Frame::relay("A: still here")).await;
        a.recv_until(&Frame::relay("A: still here")).await;

        eventually(|| async { server.client_names().await == ["A", "B"] }).await;
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn lost_client_is_announced() {
        let server = RelayServer::new(loopback(), NoopObserver);
        let addr = server.start().await.unwrap();

        let mut a = RawPeer::join(addr, "A").await;
        let c = RawPeer::join(addr, "C").await;
        a.recv().await;

        drop(c);
        assert_eq!(a.recv().await, Frame::relay("[SERVER]: C lost connection!"));
        assert_eq!(server.client_names().await, vec!["A"]);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_with_three_clients_then_restart() {
        let server = RelayServer::new(loopback(), NoopObserver);
        let addr = server.start().await.unwrap();

        let mut clients = Vec::new();
        for name in ["Alice", "Bob", "Carol"] {
            let client = ChatClient::new(Transcript::default());
            client.connect(settings(name, addr)).await.unwrap();
            clients.push(client);
        }
        eventually(|| async { server.client_count().await == 3 }).await;

        server.stop().await.unwrap();
        assert_eq!(server.client_count().await, 0);
        eventually(|| async { server.connection_count().await == 0 }).await;

        for client in &clients {
            let mut state = client.subscribe_state().await.unwrap();
            tokio::time::timeout(WAIT, state.wait_for(|s| *s == ClientState::Closed))
                .await
                .expect("client not closed")
                .unwrap();
            eventually(|| async { client.observer().has("[SERVER]: Server is closed!") }).await;
        }

        let again = server.start_on(addr.port()).await.unwrap();
        assert_eq!(again.port(), addr.port());

        let dave = ChatClient::new(Transcript::default());
        dave.connect(settings("Dave", again)).await.unwrap();
        eventually(|| async { dave.observer().has("[SERVER]: Dave connected!") }).await;
        assert_eq!(server.client_names().await, vec!["Dave"]);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn clients_chat_through_the_relay() {
        let server = RelayServer::new(loopback(), NoopObserver);
        let addr = server.start().await.unwrap();

        let alice = ChatClient::new(Transcript::default());
        let bob = ChatClient::new(Transcript::default());
        alice.connect(settings("Alice", addr)).await.unwrap();
        bob.connect(settings("Bob", addr)).await.unwrap();
        eventually(|| async { alice.observer().has("[SERVER]: Bob connected!") }).await;

        alice.send_message("hi Bob").await.unwrap();
        eventually(|| async { bob.observer().has("Alice: hi Bob") }).await;
        eventually(|| async { alice.observer().has("Alice: hi Bob") }).await;

        alice.disconnect().await.unwrap();
        assert_eq!(alice.state().await, ClientState::Closed);
        eventually(|| async { bob.observer().has("Alice: is disconnected!") }).await;
        eventually(|| async { server.client_names().await == ["Bob"] }).await;
        assert_eq!(bob.state().await, ClientState::Active);

        server.stop().await.unwrap();
    }
}
