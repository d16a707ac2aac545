//! Cluster message envelopes, byte-compatible with other socket.io nodes.
//!
//! | message                 | channel                      | encoding              |
//! |-------------------------|------------------------------|-----------------------|
//! | broadcast (no ack)      | `{key}#{nsp}#[{room}#]`      | MessagePack array     |
//! | broadcast with ack (7)  | `{key}-request#{nsp}#`       | MessagePack map       |
//! | other requests (2-6)    | `{key}-request#{nsp}#`       | JSON                  |
//! | broadcast ack (9)       | `{key}-response#{nsp}#{uid}#`| MessagePack map       |
//! | other responses         | `{key}-response#{nsp}#{uid}#`| JSON                  |
//!
//! Receivers tell the two encodings apart by the first byte: JSON objects
//! start with `{`, which is never the first byte of a MessagePack map.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::broadcast::{BroadcastOptions, Room};
use crate::domain::cluster::{ClusterMessage, ClusterRequest, ClusterResponse, RequestType};
use crate::domain::foundation::{RequestId, ServerUid};
use crate::domain::protocol::Packet;
use crate::domain::session::SocketDetails;

const JSON_OBJECT_START: u8 = 0x7b;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid MessagePack envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("MessagePack encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("missing field '{0}'")]
    MissingField(&'static str),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestEnvelope {
    uid: ServerUid,
    #[serde(rename = "type")]
    kind: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    opts: Option<BroadcastOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rooms: Option<Vec<Room>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    close: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    packet: Option<Packet>,
}

impl RequestEnvelope {
    fn new(uid: &ServerUid, kind: RequestType) -> Self {
        Self {
            uid: uid.clone(),
            kind: kind.code() as u64,
            request_id: None,
            opts: None,
            rooms: None,
            close: None,
            data: None,
            packet: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseEnvelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<u64>,
    request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sockets: Option<Vec<SocketDetails>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    packet: Option<Value>,
}

impl ResponseEnvelope {
    fn new(kind: Option<RequestType>, request_id: &RequestId) -> Self {
        Self {
            kind: kind.map(|k| k.code() as u64),
            request_id: request_id.clone(),
            sockets: None,
            data: None,
            client_count: None,
            packet: None,
        }
    }
}

fn decode_object<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    if payload.first() == Some(&JSON_OBJECT_START) {
        Ok(serde_json::from_slice(payload)?)
    } else {
        Ok(rmp_serde::from_slice(payload)?)
    }
}

/// Encodes a request for the request or broadcast channel.
pub fn encode_request(message: &ClusterMessage) -> Result<Vec<u8>, CodecError> {
    let uid = &message.uid;
    let envelope = match &message.request {
        ClusterRequest::Broadcast {
            packet,
            opts,
            request_id: None,
        } => return Ok(rmp_serde::to_vec_named(&(uid, packet, opts))?),
        ClusterRequest::Broadcast {
            packet,
            opts,
            request_id: Some(request_id),
        } => {
            let mut envelope = RequestEnvelope::new(uid, RequestType::BroadcastWithAck);
            envelope.request_id = Some(request_id.clone());
            envelope.packet = Some(packet.clone());
            envelope.opts = Some(opts.clone());
            return Ok(rmp_serde::to_vec_named(&envelope)?);
        }
        ClusterRequest::SocketsJoin { opts, rooms } => {
            let mut envelope = RequestEnvelope::new(uid, RequestType::SocketsJoin);
            envelope.opts = Some(opts.clone());
            envelope.rooms = Some(rooms.clone());
            envelope
        }
        ClusterRequest::SocketsLeave { opts, rooms } => {
            let mut envelope = RequestEnvelope::new(uid, RequestType::SocketsLeave);
            envelope.opts = Some(opts.clone());
            envelope.rooms = Some(rooms.clone());
            envelope
        }
        ClusterRequest::DisconnectSockets { opts, close } => {
            let mut envelope = RequestEnvelope::new(uid, RequestType::DisconnectSockets);
            envelope.opts = Some(opts.clone());
            envelope.close = Some(*close);
            envelope
        }
        ClusterRequest::FetchSockets { request_id, opts } => {
            let mut envelope = RequestEnvelope::new(uid, RequestType::FetchSockets);
            envelope.request_id = Some(request_id.clone());
            envelope.opts = Some(opts.clone());
            envelope
        }
        ClusterRequest::ServerSideEmit { request_id, data } => {
            let mut envelope = RequestEnvelope::new(uid, RequestType::ServerSideEmit);
            envelope.request_id = request_id.clone();
            envelope.data = Some(data.clone());
            envelope
        }
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decodes a message from the request channel.
///
/// Returns `Ok(None)` for request types this node does not handle.
pub fn decode_request(payload: &[u8]) -> Result<Option<ClusterMessage>, CodecError> {
    let envelope: RequestEnvelope = decode_object(payload)?;
    let Some(kind) = RequestType::from_code(envelope.kind) else {
        return Ok(None);
    };

    let request = match kind {
        RequestType::SocketsJoin => ClusterRequest::SocketsJoin {
            opts: envelope.opts.ok_or(CodecError::MissingField("opts"))?,
            rooms: envelope.rooms.unwrap_or_default(),
        },
        RequestType::SocketsLeave => ClusterRequest::SocketsLeave {
            opts: envelope.opts.ok_or(CodecError::MissingField("opts"))?,
            rooms: envelope.rooms.unwrap_or_default(),
        },
        RequestType::DisconnectSockets => ClusterRequest::DisconnectSockets {
            opts: envelope.opts.ok_or(CodecError::MissingField("opts"))?,
            close: envelope.close.unwrap_or(false),
        },
        RequestType::FetchSockets => ClusterRequest::FetchSockets {
            request_id: envelope
                .request_id
                .ok_or(CodecError::MissingField("requestId"))?,
            opts: envelope.opts.ok_or(CodecError::MissingField("opts"))?,
        },
        RequestType::ServerSideEmit => ClusterRequest::ServerSideEmit {
            request_id: envelope.request_id,
            data: envelope.data.ok_or(CodecError::MissingField("data"))?,
        },
        RequestType::BroadcastWithAck => ClusterRequest::Broadcast {
            packet: envelope.packet.ok_or(CodecError::MissingField("packet"))?,
            opts: envelope.opts.ok_or(CodecError::MissingField("opts"))?,
            request_id: Some(
                envelope
                    .request_id
                    .ok_or(CodecError::MissingField("requestId"))?,
            ),
        },
        RequestType::BroadcastClientCount | RequestType::BroadcastAck => return Ok(None),
    };

    Ok(Some(ClusterMessage::new(envelope.uid, request)))
}

/// Decodes a message from a broadcast channel.
pub fn decode_broadcast(payload: &[u8]) -> Result<ClusterMessage, CodecError> {
    let (uid, packet, opts): (ServerUid, Packet, BroadcastOptions) =
        rmp_serde::from_slice(payload)?;
    Ok(ClusterMessage::new(
        uid,
        ClusterRequest::Broadcast {
            packet,
            opts,
            request_id: None,
        },
    ))
}

pub fn encode_response(response: &ClusterResponse) -> Result<Vec<u8>, CodecError> {
    let envelope = match response {
        // Peers do not tag fetch responses with a type.
        ClusterResponse::FetchSockets {
            request_id,
            sockets,
        } => {
            let mut envelope = ResponseEnvelope::new(None, request_id);
            envelope.sockets = Some(sockets.clone());
            envelope
        }
        ClusterResponse::ServerSideEmit { request_id, data } => {
            let mut envelope = ResponseEnvelope::new(Some(RequestType::ServerSideEmit), request_id);
            envelope.data = Some(data.clone());
            envelope
        }
        ClusterResponse::BroadcastClientCount {
            request_id,
            client_count,
        } => {
            let mut envelope =
                ResponseEnvelope::new(Some(RequestType::BroadcastClientCount), request_id);
            envelope.client_count = Some(*client_count);
            envelope
        }
        ClusterResponse::BroadcastAck { request_id, packet } => {
            let mut envelope = ResponseEnvelope::new(Some(RequestType::BroadcastAck), request_id);
            envelope.packet = Some(packet.clone());
            return Ok(rmp_serde::to_vec_named(&envelope)?);
        }
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decodes a message from a response channel.
///
/// A missing `type` means a fetch-sockets response; unknown types yield
/// `Ok(None)`.
pub fn decode_response(payload: &[u8]) -> Result<Option<ClusterResponse>, CodecError> {
    let envelope: ResponseEnvelope = decode_object(payload)?;
    let kind = match envelope.kind {
        None => RequestType::FetchSockets,
        Some(code) => match RequestType::from_code(code) {
            Some(kind) => kind,
            None => return Ok(None),
        },
    };

    let request_id = envelope.request_id;
    let response = match kind {
        RequestType::FetchSockets => ClusterResponse::FetchSockets {
            request_id,
            sockets: envelope.sockets.unwrap_or_default(),
        },
        RequestType::ServerSideEmit => ClusterResponse::ServerSideEmit {
            request_id,
            data: envelope.data.unwrap_or(Value::Null),
        },
        RequestType::BroadcastClientCount => ClusterResponse::BroadcastClientCount {
            request_id,
            client_count: envelope
                .client_count
                .ok_or(CodecError::MissingField("clientCount"))?,
        },
        RequestType::BroadcastAck => ClusterResponse::BroadcastAck {
            request_id,
            packet: envelope.packet.unwrap_or(Value::Null),
        },
        _ => return Ok(None),
    };
    Ok(Some(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::Sid;
    use crate::domain::session::Handshake;
    use serde_json::json;

    fn uid() -> ServerUid {
        ServerUid::from("node-1")
    }

    #[test]
    fn join_request_uses_peer_json_shape() {
        let message = ClusterMessage::new(
            uid(),
            ClusterRequest::SocketsJoin {
                opts: BroadcastOptions::to_rooms(["s1"]),
                rooms: vec![Room::from("room1")],
            },
        );
        let bytes = encode_request(&message).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value,
            json!({
                "uid": "node-1",
                "type": 2,
                "opts": {"rooms": ["s1"], "except": [], "flags": {}},
                "rooms": ["room1"],
            })
        );
        assert_eq!(decode_request(&bytes).unwrap(), Some(message));
    }

    #[test]
    fn plain_broadcast_is_a_msgpack_array() {
        let message = ClusterMessage::new(
            uid(),
            ClusterRequest::Broadcast {
                packet: Packet::event("/", "hello", vec![json!(1)]),
                opts: BroadcastOptions::to_rooms(["room1"]),
                request_id: None,
            },
        );
        let bytes = encode_request(&message).unwrap();

        assert_eq!(bytes[0], 0x93);
        assert_eq!(decode_broadcast(&bytes).unwrap(), message);
    }

    #[test]
    fn broadcast_with_ack_is_a_msgpack_map() {
        let message = ClusterMessage::new(
            uid(),
            ClusterRequest::Broadcast {
                packet: Packet::event("/", "hello", vec![]),
                opts: BroadcastOptions::new(),
                request_id: Some(RequestId::from("r1")),
            },
        );
        let bytes = encode_request(&message).unwrap();

        assert_ne!(bytes[0], JSON_OBJECT_START);
        assert_eq!(decode_request(&bytes).unwrap(), Some(message));
    }

    #[test]
    fn server_side_emit_without_ack_omits_request_id() {
        let message = ClusterMessage::new(
            uid(),
            ClusterRequest::ServerSideEmit {
                request_id: None,
                data: vec![json!("hello"), json!("world")],
            },
        );
        let value: Value = serde_json::from_slice(&encode_request(&message).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"uid": "node-1", "type": 6, "data": ["hello", "world"]})
        );
    }

    #[test]
    fn fetch_response_has_no_type() {
        let response = ClusterResponse::FetchSockets {
            request_id: RequestId::from("r1"),
            sockets: vec![SocketDetails {
                id: Sid::from("s1"),
                handshake: Handshake::default(),
                rooms: vec![Room::from("s1")],
                data: json!({"user": 1}),
            }],
        };
        let bytes = encode_response(&response).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert!(value.get("type").is_none());
        assert_eq!(decode_response(&bytes).unwrap(), Some(response));
    }

    #[test]
    fn broadcast_ack_response_is_msgpack() {
        let response = ClusterResponse::BroadcastAck {
            request_id: RequestId::from("r1"),
            packet: json!(["pong"]),
        };
        let bytes = encode_response(&response).unwrap();

        assert_ne!(bytes[0], JSON_OBJECT_START);
        assert_eq!(decode_response(&bytes).unwrap(), Some(response));
    }

    #[test]
    fn client_count_requires_count() {
        let payload = br#"{"type":8,"requestId":"r1"}"#;
        assert!(matches!(
            decode_response(payload),
            Err(CodecError::MissingField("clientCount"))
        ));

        let payload = br#"{"type":8,"requestId":"r1","clientCount":3}"#;
        assert_eq!(
            decode_response(payload).unwrap(),
            Some(ClusterResponse::BroadcastClientCount {
                request_id: RequestId::from("r1"),
                client_count: 3,
            })
        );
    }

    #[test]
    fn unknown_types_are_skipped() {
        assert_eq!(decode_request(br#"{"uid":"x","type":42}"#).unwrap(), None);
        assert_eq!(
            decode_response(br#"{"type":42,"requestId":"r"}"#).unwrap(),
            None
        );
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(decode_request(b"{not json").is_err());
        assert!(decode_request(&[0xc1]).is_err());
        assert!(decode_broadcast(b"garbage").is_err());
    }

    #[test]
    fn peer_options_with_numeric_rooms_decode() {
        let payload = br#"{"uid":"peer","type":4,"opts":{"rooms":[42],"except":[],"flags":{"local":false}},"close":true}"#;
        let message = decode_request(payload).unwrap().unwrap();
        match message.request {
            ClusterRequest::DisconnectSockets { opts, close } => {
                assert!(opts.rooms.contains(&Room::Number(42)));
                assert!(close);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }
}
