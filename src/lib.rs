//! TCP line-broadcast relay library.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;

pub use config::schema::RelayConfig;
pub use error::RelayError;
pub use lifecycle::Shutdown;
pub use net::server::{RelayHandle, RelayServer};
