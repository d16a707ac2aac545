//! Engine-layer packets and their text framing.
//!
//! A packet is a one-digit type followed by its data. Over a persistent
//! socket every packet travels in its own frame; over long-polling several
//! packets are joined into one payload with the `\x1e` record separator and
//! binary data is base64-encoded behind a `b` prefix.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use thiserror::Error;

/// Separator between packets of one polling payload.
pub const RECORD_SEPARATOR: char = '\x1e';

/// Raw data carried by one frame of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Size used for the max-payload check: characters for text, bytes for binary.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.chars().count(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single engine-layer packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    /// Handshake data, sent once by the server.
    Open(String),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    /// Application data.
    Message(Frame),
    /// Commits a transport upgrade.
    Upgrade,
    Noop,
}

/// Handshake data sent in the `open` packet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub max_payload: usize,
}

/// Errors raised while decoding engine packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type '{0}'")]
    UnknownType(char),

    #[error("invalid base64 payload")]
    InvalidBase64,
}

impl EnginePacket {
    fn type_char(&self) -> char {
        match self {
            EnginePacket::Open(_) => '0',
            EnginePacket::Close => '1',
            EnginePacket::Ping(_) => '2',
            EnginePacket::Pong(_) => '3',
            EnginePacket::Message(_) => '4',
            EnginePacket::Upgrade => '5',
            EnginePacket::Noop => '6',
        }
    }

    /// Encodes the packet for a persistent socket frame.
    ///
    /// Binary messages are sent as raw binary frames without a type prefix.
    pub fn encode_frame(&self) -> Frame {
        match self {
            EnginePacket::Message(Frame::Binary(bytes)) => Frame::Binary(bytes.clone()),
            other => Frame::Text(other.encode_text()),
        }
    }

    /// Encodes the packet as text; binary messages become `b<base64>`.
    pub fn encode_text(&self) -> String {
        let mut out = String::new();
        match self {
            EnginePacket::Message(Frame::Binary(bytes)) => {
                out.push('b');
                out.push_str(&STANDARD.encode(bytes));
                return out;
            }
            _ => out.push(self.type_char()),
        }
        match self {
            EnginePacket::Open(data) => out.push_str(data),
            EnginePacket::Ping(Some(data)) | EnginePacket::Pong(Some(data)) => out.push_str(data),
            EnginePacket::Message(Frame::Text(text)) => out.push_str(text),
            _ => {}
        }
        out
    }

    /// Decodes one text packet.
    pub fn decode_text(raw: &str) -> Result<Self, PacketError> {
        let mut chars = raw.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let data = chars.as_str();
        let optional = || (!data.is_empty()).then(|| data.to_string());

        let packet = match kind {
            '0' => EnginePacket::Open(data.to_string()),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(optional()),
            '3' => EnginePacket::Pong(optional()),
            '4' => EnginePacket::Message(Frame::Text(data.to_string())),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            'b' => {
                let bytes = STANDARD
                    .decode(data)
                    .map_err(|_| PacketError::InvalidBase64)?;
                EnginePacket::Message(Frame::Binary(bytes))
            }
            other => return Err(PacketError::UnknownType(other)),
        };
        Ok(packet)
    }

    /// Decodes a frame received on a persistent socket.
    pub fn decode_frame(frame: Frame) -> Result<Self, PacketError> {
        match frame {
            Frame::Text(text) => Self::decode_text(&text),
            Frame::Binary(bytes) => Ok(EnginePacket::Message(Frame::Binary(bytes))),
        }
    }
}

/// Joins packets into one polling payload.
pub fn encode_payload(packets: &[EnginePacket]) -> String {
    let mut out = String::new();
    for (i, packet) in packets.iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.push_str(&packet.encode_text());
    }
    out
}

/// Splits a polling payload into packets.
pub fn decode_payload(payload: &str) -> Result<Vec<EnginePacket>, PacketError> {
    payload
        .split(RECORD_SEPARATOR)
        .map(EnginePacket::decode_text)
        .collect()
}
