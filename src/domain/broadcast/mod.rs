//! Rooms and broadcast targeting.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Sid;

/// A named subset of sockets within a namespace.
///
/// Peers may use numeric room names, so both forms are kept distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Room {
    Number(i64),
    Name(String),
}

impl Room {
    /// Textual form used in channel names.
    pub fn as_channel_segment(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Number(n) => write!(f, "{}", n),
            Room::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Room {
    fn from(name: &str) -> Self {
        Room::Name(name.to_string())
    }
}

impl From<String> for Room {
    fn from(name: String) -> Self {
        Room::Name(name)
    }
}

impl From<i64> for Room {
    fn from(n: i64) -> Self {
        Room::Number(n)
    }
}

impl From<&Sid> for Room {
    fn from(sid: &Sid) -> Self {
        Room::Name(sid.as_str().to_string())
    }
}

impl From<Sid> for Room {
    fn from(sid: Sid) -> Self {
        Room::Name(sid.as_str().to_string())
    }
}

/// Modifiers attached to a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastFlags {
    /// Drop instead of queueing when the transport is not writable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatile: Option<bool>,
    /// Do not replicate to the rest of the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<bool>,
    /// Acknowledgement timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl BroadcastFlags {
    pub fn is_volatile(&self) -> bool {
        self.volatile.unwrap_or(false)
    }

    pub fn is_local(&self) -> bool {
        self.local.unwrap_or(false)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }
}

/// Which sockets a namespace-wide operation targets.
///
/// An empty `rooms` set targets every socket. Sockets in any `except` room
/// are always skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastOptions {
    #[serde(default)]
    pub rooms: HashSet<Room>,
    #[serde(default)]
    pub except: HashSet<Room>,
    #[serde(default)]
    pub flags: BroadcastFlags,
}

impl BroadcastOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_rooms<I, R>(rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        Self {
            rooms: rooms.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn except<I, R>(mut self, rooms: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.except.extend(rooms.into_iter().map(Into::into));
        self
    }

    pub fn with_flags(mut self, flags: BroadcastFlags) -> Self {
        self.flags = flags;
        self
    }

    /// The single target room, when exactly one is set.
    pub fn single_room(&self) -> Option<&Room> {
        if self.rooms.len() == 1 {
            self.rooms.iter().next()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rooms_keep_numeric_names() {
        let room: Room = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(room, Room::Number(42));
        let room: Room = serde_json::from_value(json!("42")).unwrap();
        assert_eq!(room, Room::Name("42".into()));
        assert_eq!(Room::Number(42).to_string(), "42");
    }

    #[test]
    fn options_use_peer_wire_shape() {
        let opts = BroadcastOptions::to_rooms(["room1"]).except(["room2"]);
        let value = serde_json::to_value(&opts).unwrap();
        assert_eq!(
            value,
            json!({"rooms": ["room1"], "except": ["room2"], "flags": {}})
        );
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let opts: BroadcastOptions = serde_json::from_value(json!({"rooms": []})).unwrap();
        assert!(opts.except.is_empty());
        assert!(!opts.flags.is_local());
    }

    #[test]
    fn single_room_only_when_exactly_one() {
        assert!(BroadcastOptions::new().single_room().is_none());
        assert_eq!(
            BroadcastOptions::to_rooms(["a"]).single_room(),
            Some(&Room::from("a"))
        );
        assert!(BroadcastOptions::to_rooms(["a", "b"]).single_room().is_none());
    }
}
