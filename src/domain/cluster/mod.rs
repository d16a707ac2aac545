//! Messages exchanged between the nodes of a cluster.
//!
//! Requests replicate a membership or delivery effect on every peer, or ask
//! peers for data. Responses travel back to the requesting node only.

use serde_json::Value;

use crate::domain::broadcast::{BroadcastOptions, Room};
use crate::domain::foundation::{RequestId, ServerUid};
use crate::domain::protocol::Packet;
use crate::domain::session::SocketDetails;

/// Message kinds, with the integer values peers put in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    SocketsJoin = 2,
    SocketsLeave = 3,
    DisconnectSockets = 4,
    FetchSockets = 5,
    ServerSideEmit = 6,
    BroadcastWithAck = 7,
    BroadcastClientCount = 8,
    BroadcastAck = 9,
}

impl RequestType {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            2 => RequestType::SocketsJoin,
            3 => RequestType::SocketsLeave,
            4 => RequestType::DisconnectSockets,
            5 => RequestType::FetchSockets,
            6 => RequestType::ServerSideEmit,
            7 => RequestType::BroadcastWithAck,
            8 => RequestType::BroadcastClientCount,
            9 => RequestType::BroadcastAck,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterRequest {
    /// Deliver `packet` to the matching local sockets; with a request id the
    /// receiver reports its client count and forwards every acknowledgement.
    Broadcast {
        packet: Packet,
        opts: BroadcastOptions,
        request_id: Option<RequestId>,
    },
    SocketsJoin {
        opts: BroadcastOptions,
        rooms: Vec<Room>,
    },
    SocketsLeave {
        opts: BroadcastOptions,
        rooms: Vec<Room>,
    },
    DisconnectSockets {
        opts: BroadcastOptions,
        close: bool,
    },
    FetchSockets {
        request_id: RequestId,
        opts: BroadcastOptions,
    },
    /// `data` is `[event, ...args]`; a request id asks for one reply.
    ServerSideEmit {
        request_id: Option<RequestId>,
        data: Vec<Value>,
    },
}

impl ClusterRequest {
    /// Wire type; a broadcast without acknowledgement has none.
    pub fn request_type(&self) -> Option<RequestType> {
        match self {
            ClusterRequest::Broadcast {
                request_id: None, ..
            } => None,
            ClusterRequest::Broadcast { .. } => Some(RequestType::BroadcastWithAck),
            ClusterRequest::SocketsJoin { .. } => Some(RequestType::SocketsJoin),
            ClusterRequest::SocketsLeave { .. } => Some(RequestType::SocketsLeave),
            ClusterRequest::DisconnectSockets { .. } => Some(RequestType::DisconnectSockets),
            ClusterRequest::FetchSockets { .. } => Some(RequestType::FetchSockets),
            ClusterRequest::ServerSideEmit { .. } => Some(RequestType::ServerSideEmit),
        }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            ClusterRequest::Broadcast { request_id, .. }
            | ClusterRequest::ServerSideEmit { request_id, .. } => request_id.as_ref(),
            ClusterRequest::FetchSockets { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

/// A request tagged with the node that issued it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMessage {
    pub uid: ServerUid,
    pub request: ClusterRequest,
}

impl ClusterMessage {
    pub fn new(uid: ServerUid, request: ClusterRequest) -> Self {
        Self { uid, request }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterResponse {
    FetchSockets {
        request_id: RequestId,
        sockets: Vec<SocketDetails>,
    },
    ServerSideEmit {
        request_id: RequestId,
        data: Value,
    },
    BroadcastClientCount {
        request_id: RequestId,
        client_count: usize,
    },
    BroadcastAck {
        request_id: RequestId,
        packet: Value,
    },
}

impl ClusterResponse {
    pub fn request_id(&self) -> &RequestId {
        match self {
            ClusterResponse::FetchSockets { request_id, .. }
            | ClusterResponse::ServerSideEmit { request_id, .. }
            | ClusterResponse::BroadcastClientCount { request_id, .. }
            | ClusterResponse::BroadcastAck { request_id, .. } => request_id,
        }
    }

    pub fn response_type(&self) -> RequestType {
        match self {
            ClusterResponse::FetchSockets { .. } => RequestType::FetchSockets,
            ClusterResponse::ServerSideEmit { .. } => RequestType::ServerSideEmit,
            ClusterResponse::BroadcastClientCount { .. } => RequestType::BroadcastClientCount,
            ClusterResponse::BroadcastAck { .. } => RequestType::BroadcastAck,
        }
    }
}
