//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Trigger received → stop accepting → open sessions drain → serve returns
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Shutdown is soft: the listener stops, established connections are not
//!   forcibly closed
//! - Signal handling lives here so the network layer stays OS-agnostic

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
