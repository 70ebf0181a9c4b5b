//! Per-connection read and write pumps.

use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use chatrelay_protocol::constants::{CLOSE_TIMEOUT, WRITE_TIMEOUT};
use chatrelay_protocol::{Frame, FrameCodec, encode_frame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::handler::{CloseReason, FrameHandler};
use crate::{ConnectionError, ConnectionId, SEND_BUFFER_SIZE};

/// Handle to one open duplex stream.
///
/// Cheap to clone. Writes are queued to the connection's write pump and
/// never wait on the peer; [`close`](Self::close) is idempotent and stops
/// both pumps after the queued frames are flushed.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    peer: Arc<str>,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address (or other label) of the peer.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns `true` until the connection is closed from either side.
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Queues already-encoded frame bytes for delivery.
    pub fn write(&self, bytes: Bytes) -> Result<(), ConnectionError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        self.tx.try_send(bytes).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::BufferFull,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    /// Encodes and queues a single frame.
    pub fn write_frame(&self, frame: &Frame) -> Result<(), ConnectionError> {
        self.write(encode_frame(frame)?)
    }

    /// Signals both pumps to stop. Frames queued before this call are still flushed.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Closes the connection and waits (bounded) until queued frames are flushed.
    ///
    /// Returns `false` if the flush did not finish within [`CLOSE_TIMEOUT`].
    pub async fn close_and_wait(&self) -> bool {
        self.close();
        tokio::time::timeout(CLOSE_TIMEOUT, self.finished.cancelled())
            .await
            .is_ok()
    }

    /// Resolves once the write pump has shut the stream down.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }
}

/// Starts the read and write pumps for `stream`.
///
/// `buffer_size` is the size of each read; decoded frames are passed to
/// `handler` in stream order. The connection is cancelled together with
/// `parent`.
pub fn spawn_connection<S, H>(
    stream: S,
    peer: impl Into<String>,
    buffer_size: usize,
    handler: Arc<H>,
    parent: &CancellationToken,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    H: FrameHandler,
{
    let (tx, rx) = mpsc::channel::<Bytes>(SEND_BUFFER_SIZE);
    let peer: String = peer.into();
    let conn = Connection {
        id: ConnectionId::new(),
        peer: Arc::from(peer),
        tx,
        cancel: parent.child_token(),
        finished: CancellationToken::new(),
    };

    let (reader, writer) = tokio::io::split(stream);
    let write_error: Arc<OnceLock<String>> = Arc::new(OnceLock::new());

    tokio::spawn(write_pump(
        writer,
        rx,
        conn.clone(),
        Arc::clone(&write_error),
    ));

    let read_conn = conn.clone();
    tokio::spawn(async move {
        handler.on_open(read_conn.clone()).await;

        let mut reason = read_pump(reader, buffer_size.max(1), &read_conn, handler.as_ref()).await;
        if reason == CloseReason::Local {
            // A failed write cancels the connection; report it as the cause.
            if let Some(e) = write_error.get() {
                reason = CloseReason::Error(e.clone());
            }
        }

        // When the read pump exits, stop the write pump too.
        read_conn.close();
        debug!(conn = %read_conn.id, peer = %read_conn.peer, %reason, "connection closed");
        handler.on_closed(read_conn, reason).await;
    });

    conn
}

/// Read pump: accumulates bytes and dispatches every complete frame.
async fn read_pump<R, H>(
    mut reader: R,
    buffer_size: usize,
    conn: &Connection,
    handler: &H,
) -> CloseReason
where
    R: AsyncRead + Unpin,
    H: FrameHandler,
{
    let mut buf = vec![0u8; buffer_size];
    let mut partial = BytesMut::with_capacity(buffer_size);
    let mut codec = FrameCodec::new();

    loop {
        let n = tokio::select! {
            _ = conn.cancel.cancelled() => return CloseReason::Local,

            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    if !partial.is_empty() {
                        debug!(conn = %conn.id, pending = partial.len(), "discarding unterminated bytes");
                    }
                    return CloseReason::PeerClosed;
                }
                Ok(n) => n,
                Err(e) => return CloseReason::Error(e.to_string()),
            },
        };

        partial.extend_from_slice(&buf[..n]);

        loop {
            if conn.cancel.is_cancelled() {
                return CloseReason::Local;
            }
            match codec.decode(&mut partial) {
                Ok(Some(frame)) => {
                    trace!(conn = %conn.id, %frame, "frame received");
                    handler.on_frame(conn.clone(), frame).await;
                }
                Ok(None) => break,
                Err(e) => return CloseReason::Error(e.to_string()),
            }
        }
    }
}

/// Write pump: drains the send queue until the connection is cancelled.
///
/// The queue is polled first, so frames queued before cancellation are
/// still written.
async fn write_pump<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Bytes>,
    conn: Connection,
    write_error: Arc<OnceLock<String>>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            msg = rx.recv() => {
                match msg {
                    Some(bytes) => {
                        if let Err(e) = write_bytes(&mut writer, &bytes).await {
                            warn!(conn = %conn.id, peer = %conn.peer, "write failed: {e}");
                            let _ = write_error.set(e.to_string());
                            conn.cancel.cancel();
                            break;
                        }
                    }
                    None => break, // All handles dropped.
                }
            }

            _ = conn.cancel.cancelled() => break,
        }
    }

    // Best-effort half close so the peer sees EOF.
    let _ = tokio::time::timeout(WRITE_TIMEOUT, writer.shutdown()).await;
    conn.finished.cancel();
}

async fn write_bytes<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    };
    match tokio::time::timeout(WRITE_TIMEOUT, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
    }
}
