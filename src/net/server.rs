//! Relay server: accept loop and the per-connection ingress/egress loops.
//!
//! # Responsibilities
//! - Bind the listener and accept inbound connections
//! - Register each connection before its loops start
//! - Run the two per-connection loops (framed read, queue drain)
//! - Stop accepting on shutdown while letting open sessions drain

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::lifecycle::Shutdown;
use crate::net::connection::{CloseSignal, Connection};
use crate::net::registry::Registry;

/// Notice sent to a peer whose cumulative uploaded bytes reached the limit.
pub const UPLOAD_LIMIT_NOTICE: &[u8] = b"Disconnected due to exceeding uploaded bytes limit\n";

/// Notice sent to a peer whose cumulative downloaded bytes reached the limit.
pub const DOWNLOAD_LIMIT_NOTICE: &[u8] = b"Disconnected due to exceeding downloaded bytes limit\n";

/// A line-broadcast relay bound to a listening socket.
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    byte_limit: u64,
    queue_capacity: usize,
    shutdown: Shutdown,
}

/// Cloneable handle for stopping a running relay's accept loop.
#[derive(Clone)]
pub struct RelayHandle {
    shutdown: Shutdown,
}

impl RelayHandle {
    /// Stop accepting new connections. Established sessions are not touched;
    /// they drain through their own loops' exit paths.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }
}

impl RelayServer {
    /// Bind the configured address. This is the relay's `start` entry point.
    ///
    /// The caller owns the shutdown coordinator so it can wire signal
    /// handlers (or tests) to the same trigger as `handle()`.
    pub async fn bind(config: &RelayConfig, shutdown: Shutdown) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(&config.listener.bind_address)
            .await
            .map_err(RelayError::Bind)?;
        let local_addr = listener.local_addr().map_err(RelayError::Bind)?;

        tracing::info!(
            address = %local_addr,
            byte_limit = config.limits.byte_limit,
            queue_capacity = config.limits.outbound_queue_capacity,
            "Listener bound"
        );

        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            byte_limit: config.limits.byte_limit,
            queue_capacity: config.limits.outbound_queue_capacity,
            shutdown,
        })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for triggering shutdown from another task.
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Accept connections until the listener fails or shutdown is triggered.
    ///
    /// Returns `Err(ShuttingDown)` after a deliberate shutdown and
    /// `Err(Accept)` on a listener fault; it never returns `Ok`.
    pub async fn serve(self) -> Result<(), RelayError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            let accepted = tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(
                        open_sessions = self.registry.len(),
                        "Accept loop stopped; open sessions drain on their own"
                    );
                    return Err(RelayError::ShuttingDown);
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = accepted.map_err(|e| {
                tracing::error!(error = %e, "Accept failed");
                RelayError::Accept(e)
            })?;

            self.spawn_session(stream, peer_addr);
        }
    }

    /// Register a connection and start its ingress/egress loop pair.
    fn spawn_session(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let (conn, outbound_rx, close_rx) =
            Connection::new(peer_addr, write_half, self.byte_limit, self.queue_capacity);

        // Registered before either loop runs, so the very first broadcast
        // from any peer can already reach this connection.
        self.registry.add(Arc::clone(&conn));
        tracing::debug!(
            connection_id = %conn.id(),
            peer_addr = %peer_addr,
            members = self.registry.len(),
            "Connection accepted"
        );

        tokio::spawn(ingress_loop(
            Arc::clone(&self.registry),
            Arc::clone(&conn),
            read_half,
            close_rx.clone(),
        ));
        tokio::spawn(egress_loop(
            Arc::clone(&self.registry),
            conn,
            outbound_rx,
            close_rx,
        ));
    }
}

/// Read newline-delimited messages, enforce the upload cap, fan out.
///
/// The framed read is the only suspension point apart from the close signal;
/// any read fault, EOF, or limit breach ends the loop, and every exit path
/// funnels through the idempotent `Registry::remove`.
async fn ingress_loop(
    registry: Arc<Registry>,
    conn: Arc<Connection>,
    read_half: OwnedReadHalf,
    mut close_rx: CloseSignal,
) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            _ = close_rx.changed() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break,
            // No trailing delimiter means the peer closed mid-line; the
            // fragment is dropped, as an unterminated frame never completed.
            Ok(_) if buf.last() != Some(&b'\n') => break,
            Ok(n) => {
                conn.add_uploaded(n as u64);
                if conn.upload_exceeded() {
                    tracing::info!(
                        connection_id = %conn.id(),
                        peer_addr = %conn.peer_addr(),
                        uploaded = conn.uploaded(),
                        "Upload limit exceeded, disconnecting"
                    );
                    conn.write_notice(UPLOAD_LIMIT_NOTICE).await;
                    break;
                }
                let msg = Bytes::from(std::mem::take(&mut buf));
                registry.fanout(conn.id(), &msg);
            }
            Err(e) => {
                tracing::debug!(
                    connection_id = %conn.id(),
                    peer_addr = %conn.peer_addr(),
                    error = %e,
                    "Read failed"
                );
                break;
            }
        }
    }
    registry.remove(&conn);
}

/// Drain the outbound queue to the transport, enforcing the download cap.
///
/// Exits when the close signal fires, the queue's senders are gone, or a
/// write fails; like the ingress loop, every exit funnels through
/// `Registry::remove`.
async fn egress_loop(
    registry: Arc<Registry>,
    conn: Arc<Connection>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    mut close_rx: CloseSignal,
) {
    loop {
        let msg = tokio::select! {
            _ = close_rx.changed() => break,
            msg = outbound_rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        if let Err(e) = conn.write_message(&msg).await {
            tracing::debug!(
                connection_id = %conn.id(),
                peer_addr = %conn.peer_addr(),
                error = %e,
                "Write failed"
            );
            break;
        }

        conn.add_downloaded(msg.len() as u64);
        if conn.download_exceeded() {
            tracing::info!(
                connection_id = %conn.id(),
                peer_addr = %conn.peer_addr(),
                downloaded = conn.downloaded(),
                "Download limit exceeded, disconnecting"
            );
            conn.write_notice(DOWNLOAD_LIMIT_NOTICE).await;
            break;
        }
    }
    registry.remove(&conn);
}
