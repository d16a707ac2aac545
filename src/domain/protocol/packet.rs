//! Application-layer packets and their text encoding.
//!
//! ```text
//! <type>[<namespace>,][<ack id>][<json data>]
//!
//! 2["hello",1]          event on the main namespace
//! 2/chat,12["msg"]      event on /chat expecting ack 12
//! 3/chat,12["ok"]       acknowledgement of 12
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Main namespace name.
pub const MAIN_NAMESPACE: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl From<PacketType> for u8 {
    fn from(kind: PacketType) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => PacketType::Connect,
            1 => PacketType::Disconnect,
            2 => PacketType::Event,
            3 => PacketType::Ack,
            4 => PacketType::ConnectError,
            5 => PacketType::BinaryEvent,
            6 => PacketType::BinaryAck,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type {0}")]
    UnknownType(u8),

    #[error("binary attachments are not supported")]
    BinaryAttachments,

    #[error("invalid ack id")]
    InvalidId,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// A decoded application packet.
///
/// Serializes to the `{type, nsp, data, id}` shape peers exchange on the
/// cluster bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "type")]
    pub kind: PacketType,
    #[serde(default = "main_namespace")]
    pub nsp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

fn main_namespace() -> String {
    MAIN_NAMESPACE.to_string()
}

impl Packet {
    pub fn new(kind: PacketType, nsp: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind,
            nsp: nsp.into(),
            data,
            id: None,
        }
    }

    pub fn connect(nsp: impl Into<String>, data: Value) -> Self {
        Self::new(PacketType::Connect, nsp, Some(data))
    }

    pub fn connect_error(nsp: impl Into<String>, message: &str, data: Option<Value>) -> Self {
        let mut body = serde_json::Map::new();
        body.insert("message".into(), Value::String(message.to_string()));
        if let Some(data) = data {
            body.insert("data".into(), data);
        }
        Self::new(PacketType::ConnectError, nsp, Some(Value::Object(body)))
    }

    pub fn disconnect(nsp: impl Into<String>) -> Self {
        Self::new(PacketType::Disconnect, nsp, None)
    }

    /// Event packet whose data is `[event, ...args]`.
    pub fn event(nsp: impl Into<String>, event: &str, args: Vec<Value>) -> Self {
        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Value::String(event.to_string()));
        data.extend(args);
        Self::new(PacketType::Event, nsp, Some(Value::Array(data)))
    }

    pub fn ack(nsp: impl Into<String>, id: u64, args: Vec<Value>) -> Self {
        let mut packet = Self::new(PacketType::Ack, nsp, Some(Value::Array(args)));
        packet.id = Some(id);
        packet
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Event name of an event packet.
    pub fn event_name(&self) -> Option<&str> {
        match &self.data {
            Some(Value::Array(items)) => items.first().and_then(Value::as_str),
            _ => None,
        }
    }

    /// Data items as a list; a non-array payload becomes a single item.
    pub fn args(&self) -> Vec<Value> {
        match &self.data {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        }
    }

    /// Appends an argument to an array payload.
    pub fn push_arg(&mut self, value: Value) {
        match &mut self.data {
            Some(Value::Array(items)) => items.push(value),
            _ => self.data = Some(Value::Array(vec![value])),
        }
    }

    pub fn encode(&self) -> String {
        let mut out = (self.kind as u8).to_string();
        if self.nsp != MAIN_NAMESPACE && !self.nsp.is_empty() {
            out.push_str(&self.nsp);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let first = raw.bytes().next().ok_or(ProtocolError::Empty)?;
        if !first.is_ascii_digit() {
            return Err(ProtocolError::InvalidPayload(format!(
                "unexpected type prefix '{}'",
                first as char
            )));
        }
        let kind = PacketType::try_from(first - b'0')?;
        if matches!(kind, PacketType::BinaryEvent | PacketType::BinaryAck) {
            return Err(ProtocolError::BinaryAttachments);
        }

        let mut rest = &raw[1..];

        let nsp = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let nsp = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or("");
            nsp
        } else {
            MAIN_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidId)?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest)
                    .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?,
            )
        };

        let packet = Packet { kind, nsp, data, id };
        packet.validate()?;
        Ok(packet)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let valid = match (self.kind, &self.data) {
            (PacketType::Connect, None) | (PacketType::Connect, Some(Value::Object(_))) => true,
            (PacketType::Disconnect, None) => true,
            (PacketType::Event, Some(Value::Array(items))) => {
                matches!(items.first(), Some(Value::String(_)))
            }
            (PacketType::Ack, Some(Value::Array(_))) => self.id.is_some(),
            (PacketType::ConnectError, Some(Value::Object(_)))
            | (PacketType::ConnectError, Some(Value::String(_))) => true,
            _ => false,
        };
        if valid {
            Ok(())
        } else {
            Err(ProtocolError::InvalidPayload(format!(
                "invalid data for packet type {}",
                self.kind
            )))
        }
    }
}
