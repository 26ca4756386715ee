//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, queue capacity > 0)
//! - Check the bind address parses as a socket address
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::RelayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Bind address is not a valid socket address.
    InvalidBindAddress(String),
    /// A zero byte limit would disconnect every peer on its first message.
    ZeroByteLimit,
    /// A zero-capacity outbound queue would evict every peer on the first
    /// broadcast aimed at it.
    ZeroQueueCapacity,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidBindAddress(addr) => {
                write!(f, "invalid bind address: {}", addr)
            }
            ValidationError::ZeroByteLimit => write!(f, "byte_limit must be greater than zero"),
            ValidationError::ZeroQueueCapacity => {
                write!(f, "outbound_queue_capacity must be greater than zero")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration for semantic problems, reporting all of them.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.limits.byte_limit == 0 {
        errors.push(ValidationError::ZeroByteLimit);
    }
    if config.limits.outbound_queue_capacity == 0 {
        errors.push(ValidationError::ZeroQueueCapacity);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
