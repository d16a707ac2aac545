//! Request rejection codes of the engine layer.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

/// Why an HTTP request was refused before reaching a connection.
///
/// The numeric values are part of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorCode {
    UnknownTransport = 0,
    UnknownSid = 1,
    BadHandshakeMethod = 2,
    BadRequest = 3,
    Forbidden = 4,
    UnsupportedProtocolVersion = 5,
}

impl EngineErrorCode {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Fixed message sent in the error body.
    pub fn message(&self) -> &'static str {
        match self {
            EngineErrorCode::UnknownTransport => "Transport unknown",
            EngineErrorCode::UnknownSid => "Session ID unknown",
            EngineErrorCode::BadHandshakeMethod => "Bad handshake method",
            EngineErrorCode::BadRequest => "Bad request",
            EngineErrorCode::Forbidden => "Forbidden",
            EngineErrorCode::UnsupportedProtocolVersion => "Unsupported protocol version",
        }
    }

    /// HTTP status used when answering the rejected request.
    pub fn status(&self) -> u16 {
        match self {
            EngineErrorCode::Forbidden => 403,
            _ => 400,
        }
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A rejected request, as reported to the connection-error observer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionError {
    pub code: EngineErrorCode,
    pub message: String,
    /// Offending values (transport name, sid, method, protocol, hook reason).
    pub context: Map<String, Value>,
}

impl ConnectionError {
    pub fn new(code: EngineErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// JSON body sent back to the client.
    ///
    /// Admission refusals carry the hook's reason as the message.
    pub fn body(&self) -> ErrorBody {
        let message = match (self.code, self.context.get("message")) {
            (EngineErrorCode::Forbidden, Some(Value::String(reason))) => reason.clone(),
            _ => self.message.clone(),
        };
        ErrorBody {
            code: self.code.code(),
            message,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code.code())
    }
}

impl std::error::Error for ConnectionError {}

/// `{code, message}` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: u8,
    pub message: String,
}
