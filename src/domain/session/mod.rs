//! Socket snapshots and reconnection state.
//!
//! `SocketDetails` is what a node reports about its sockets to the rest of
//! the cluster; `Session` and `PersistedPacket` back connection state
//! recovery.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::broadcast::{BroadcastOptions, Room};
use crate::domain::foundation::{PrivateId, Sid, Timestamp};
use crate::domain::protocol::Packet;

/// Details of the request that opened a socket's connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Handshake {
    pub headers: HashMap<String, String>,
    pub time: String,
    pub address: String,
    pub xdomain: bool,
    pub secure: bool,
    /// Unix milliseconds.
    pub issued: i64,
    pub url: String,
    pub query: HashMap<String, String>,
    pub auth: Value,
}

/// Serializable snapshot of a socket, as exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketDetails {
    pub id: Sid,
    #[serde(default)]
    pub handshake: Handshake,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub data: Value,
}

/// Connection state recovery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryOptions {
    /// How long a disconnected session and the packets it may miss are kept.
    pub max_disconnection_duration: Duration,
    /// Whether a recovered socket bypasses the namespace middlewares.
    pub skip_middlewares: bool,
    /// Upper bound of the replay log.
    pub max_packets: usize,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            max_disconnection_duration: Duration::from_secs(120),
            skip_middlewares: true,
            max_packets: 10_000,
        }
    }
}

/// State kept for a disconnected socket so it can resume later.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub sid: Sid,
    pub pid: PrivateId,
    pub rooms: Vec<Room>,
    pub data: Value,
    pub disconnected_at: Timestamp,
}

impl Session {
    pub fn new(sid: Sid, pid: PrivateId, rooms: Vec<Room>, data: Value) -> Self {
        Self {
            sid,
            pid,
            rooms,
            data,
            disconnected_at: Timestamp::now(),
        }
    }
}

/// A session found on reconnection, with the events it missed.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredSession {
    pub session: Session,
    pub missed_packets: Vec<Packet>,
}

/// A broadcast event remembered for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedPacket {
    pub offset: String,
    pub emitted_at: Timestamp,
    pub packet: Packet,
    pub opts: BroadcastOptions,
}

impl PersistedPacket {
    /// Whether a socket that was in `rooms` would have received this packet.
    pub fn is_visible_to(&self, rooms: &[Room]) -> bool {
        let included =
            self.opts.rooms.is_empty() || rooms.iter().any(|room| self.opts.rooms.contains(room));
        let excluded = rooms.iter().any(|room| self.opts.except.contains(room));
        included && !excluded
    }
}
