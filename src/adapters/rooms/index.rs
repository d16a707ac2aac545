//! Bidirectional room membership index.
//!
//! ```text
//! rooms: room-a → {s1, s2}        sids: s1 → {room-a, s1}
//!        room-b → {s2}                  s2 → {room-a, room-b, s2}
//! ```
//!
//! Every mutation updates both maps and reports the lifecycle events it
//! caused, so the caller can notify listeners after releasing its lock.

use std::collections::{HashMap, HashSet};

use crate::domain::broadcast::{BroadcastOptions, Room};
use crate::domain::foundation::Sid;

/// A change in room lifecycle or membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Created(Room),
    Deleted(Room),
    Joined(Room, Sid),
    Left(Room, Sid),
}

#[derive(Debug, Default)]
pub struct RoomIndex {
    rooms: HashMap<Room, HashSet<Sid>>,
    sids: HashMap<Sid, HashSet<Room>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_all(&mut self, id: &Sid, rooms: &[Room]) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        let joined = self.sids.entry(id.clone()).or_default();

        for room in rooms {
            joined.insert(room.clone());

            if !self.rooms.contains_key(room) {
                events.push(RoomEvent::Created(room.clone()));
            }
            let members = self.rooms.entry(room.clone()).or_default();
            if members.insert(id.clone()) {
                events.push(RoomEvent::Joined(room.clone(), id.clone()));
            }
        }
        events
    }

    pub fn del(&mut self, id: &Sid, room: &Room) -> Vec<RoomEvent> {
        if let Some(joined) = self.sids.get_mut(id) {
            joined.remove(room);
        }
        self.remove_from_room(room, id)
    }

    pub fn del_all(&mut self, id: &Sid) -> Vec<RoomEvent> {
        let Some(joined) = self.sids.remove(id) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        for room in &joined {
            events.extend(self.remove_from_room(room, id));
        }
        events
    }

    fn remove_from_room(&mut self, room: &Room, id: &Sid) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        let Some(members) = self.rooms.get_mut(room) else {
            return events;
        };
        if members.remove(id) {
            events.push(RoomEvent::Left(room.clone(), id.clone()));
        }
        if members.is_empty() {
            self.rooms.remove(room);
            events.push(RoomEvent::Deleted(room.clone()));
        }
        events
    }

    pub fn socket_rooms(&self, id: &Sid) -> Option<HashSet<Room>> {
        self.sids.get(id).cloned()
    }

    pub fn has_room(&self, room: &Room) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn members(&self, room: &Room) -> Option<&HashSet<Sid>> {
        self.rooms.get(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Sockets selected by `opts`, each at most once.
    ///
    /// With target rooms, the union of their members; without, every known
    /// socket. Members of any excluded room are removed in both cases.
    pub fn matching(&self, opts: &BroadcastOptions) -> Vec<Sid> {
        let except = self.except_sids(&opts.except);

        if opts.rooms.is_empty() {
            return self
                .sids
                .keys()
                .filter(|id| !except.contains(*id))
                .cloned()
                .collect();
        }

        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for room in &opts.rooms {
            let Some(members) = self.rooms.get(room) else {
                continue;
            };
            for id in members {
                if except.contains(id) || !seen.insert(id) {
                    continue;
                }
                matched.push(id.clone());
            }
        }
        matched
    }

    fn except_sids(&self, rooms: &HashSet<Room>) -> HashSet<&Sid> {
        rooms
            .iter()
            .filter_map(|room| self.rooms.get(room))
            .flatten()
            .collect()
    }

    /// Checks that every membership edge exists in both directions.
    pub fn is_consistent(&self) -> bool {
        let forward = self.rooms.iter().all(|(room, members)| {
            !members.is_empty()
                && members
                    .iter()
                    .all(|id| self.sids.get(id).is_some_and(|joined| joined.contains(room)))
        });
        let backward = self.sids.iter().all(|(id, joined)| {
            joined
                .iter()
                .all(|room| self.rooms.get(room).is_some_and(|members| members.contains(id)))
        });
        forward && backward
    }
}
