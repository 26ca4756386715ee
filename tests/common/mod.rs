//! Shared utilities for relay integration tests.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use line_relay::{RelayConfig, RelayError, RelayHandle, RelayServer, Shutdown};

/// Start a relay on an ephemeral loopback port.
///
/// Returns the bound address, the shutdown handle, and the join handle for
/// the serve task.
pub async fn start_relay(
    byte_limit: u64,
    queue_capacity: usize,
) -> (SocketAddr, RelayHandle, JoinHandle<Result<(), RelayError>>) {
    let mut config = RelayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.limits.byte_limit = byte_limit;
    config.limits.outbound_queue_capacity = queue_capacity;

    let server = RelayServer::bind(&config, Shutdown::new()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    let serve = tokio::spawn(server.serve());

    (addr, handle, serve)
}

/// A test peer: buffered reader plus raw writer over one TCP connection.
pub struct Peer {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl Peer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read one line, including the trailing delimiter. Empty means EOF.
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line
    }
}
