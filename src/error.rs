//! Crate-level error types.
//!
//! Transport-level read/write failures never appear here: they are local to
//! one connection, logged, and resolved by tearing that connection down.
//! Only listener-level faults and configuration problems surface to callers.

use thiserror::Error;

/// Errors returned by the relay server's public entry points.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Failed to bind the listening socket.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    /// The accept loop failed.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    /// The accept loop was stopped by a deliberate shutdown.
    #[error("server is shutting down")]
    ShuttingDown,
}
