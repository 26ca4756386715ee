//! Per-connection state and lifecycle.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track uploaded/downloaded byte totals against the configured limit
//! - Hold the bounded outbound queue fed by peer fan-out
//! - Guarantee exactly-once teardown under concurrent triggers

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch, Mutex};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a non-blocking enqueue onto the outbound queue was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue is at capacity; the connection is a slow consumer.
    Full,
    /// The connection has already begun teardown.
    Closed,
}

/// Receiver side of the close signal; both per-connection loops select on it.
pub type CloseSignal = watch::Receiver<bool>;

/// One live relay session.
///
/// Owns the write half of the transport (the read half belongs to the ingress
/// loop), the byte counters, and the sender side of the bounded outbound
/// queue. Shared via `Arc` between the registry and both loops.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    /// Ceiling applied independently to uploaded and downloaded totals.
    byte_limit: u64,
    uploaded: AtomicU64,
    downloaded: AtomicU64,
    outbound: mpsc::Sender<Bytes>,
    /// One-shot close gate; the first `begin_close` wins.
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    /// Serializes egress writes with the ingress path's limit notice, so the
    /// two never interleave mid-message on the wire.
    writer: Mutex<OwnedWriteHalf>,
}

impl Connection {
    /// Construct a connection around a live transport's write half.
    ///
    /// Returns the connection together with the outbound-queue receiver (for
    /// the egress loop) and the close signal (for both loops).
    pub fn new(
        peer_addr: SocketAddr,
        writer: OwnedWriteHalf,
        byte_limit: u64,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>, CloseSignal) {
        let (outbound, outbound_rx) = mpsc::channel(queue_capacity);
        let (close_tx, close_rx) = watch::channel(false);
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            peer_addr,
            byte_limit,
            uploaded: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            outbound,
            closed: AtomicBool::new(false),
            close_tx,
            writer: Mutex::new(writer),
        });
        (conn, outbound_rx, close_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Record `n` bytes read from this peer. Safe under concurrent callers.
    pub fn add_uploaded(&self, n: u64) {
        self.uploaded.fetch_add(n, Ordering::Relaxed);
    }

    /// Record `n` bytes written to this peer. Safe under concurrent callers.
    pub fn add_downloaded(&self, n: u64) {
        self.downloaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// True iff the uploaded total has reached the byte limit.
    pub fn upload_exceeded(&self) -> bool {
        self.uploaded() >= self.byte_limit
    }

    /// True iff the downloaded total has reached the byte limit.
    pub fn download_exceeded(&self) -> bool {
        self.downloaded() >= self.byte_limit
    }

    /// Attempt a non-blocking enqueue onto this connection's outbound queue.
    ///
    /// Never blocks; `Full` marks this connection a slow consumer.
    pub fn enqueue(&self, msg: Bytes) -> Result<(), EnqueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EnqueueError::Closed);
        }
        self.outbound.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Fire the one-shot close gate.
    ///
    /// Returns true for exactly one caller regardless of how many teardown
    /// triggers race; the winner also wakes both loops via the close signal.
    pub fn begin_close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            let _ = self.close_tx.send(true);
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write one whole message to the transport under the writer lock.
    ///
    /// The write races the close signal so that teardown can unblock a write
    /// stalled on a peer that never drains its socket. Subscribing before the
    /// closed-flag check closes the race with a concurrent `begin_close`
    /// (the flag is set before the signal fires).
    pub async fn write_message(&self, msg: &[u8]) -> std::io::Result<()> {
        let mut close_rx = self.close_tx.subscribe();
        if self.is_closed() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "connection closed",
            ));
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            res = writer.write_all(msg) => res,
            _ = close_rx.changed() => Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "connection closed",
            )),
        }
    }

    /// Best-effort write of a disconnect notice; errors are ignored because
    /// the connection is being torn down either way.
    pub async fn write_notice(&self, notice: &[u8]) {
        let _ = self.write_message(notice).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("uploaded", &self.uploaded())
            .field("downloaded", &self.downloaded())
            .field("closed", &self.is_closed())
            .finish()
    }
}
