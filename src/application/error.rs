//! Errors raised by the socket layer.

use serde_json::Value;
use thiserror::Error;

use crate::domain::foundation::Shortfall;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SocketError {
    #[error("\"{0}\" is a reserved event name")]
    ReservedEvent(String),

    #[error("socket has been disconnected")]
    Disconnected,

    /// The acknowledgement deadline fired; carries the responses received.
    #[error("{0}")]
    Timeout(Shortfall<Value>),
}

/// Refusal raised by a namespace middleware; sent to the client in a
/// `CONNECT_ERROR` packet.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct MiddlewareError {
    pub message: String,
    pub data: Option<Value>,
}

impl MiddlewareError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
