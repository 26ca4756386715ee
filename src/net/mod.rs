//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → server.rs (accept loop)
//!     → connection.rs (counters, outbound queue, close guard)
//!     → registry.rs (membership, fan-out to peers)
//!
//! Per connection:
//!     ingress loop: framed read → upload cap → registry fan-out
//!     egress loop:  outbound queue → transport write → download cap
//! ```
//!
//! # Design Decisions
//! - Two tasks per connection, one per direction; blocking I/O calls are the
//!   only suspension points
//! - Fan-out never blocks the sender: bounded queues, try-enqueue, evict on
//!   full
//! - Teardown is idempotent no matter which of its triggers fires first

pub mod connection;
pub mod registry;
pub mod server;
