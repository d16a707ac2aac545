//! Errors raised while loading or checking configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// A section holds a value the server cannot run with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid bind address")]
    InvalidBindAddress,

    #[error("Timeouts must be greater than zero")]
    InvalidTimeout,

    #[error("Max HTTP buffer size must be greater than zero")]
    InvalidBufferSize,

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    #[error("Path must start with '/': {0}")]
    InvalidPath(String),

    #[error("Recovery needs a disconnection window and a packet cap")]
    InvalidRecovery,

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,
}
