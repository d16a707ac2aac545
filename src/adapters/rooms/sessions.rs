//! Connection state recovery storage.
//!
//! Keeps the sessions of recently disconnected sockets and a bounded log of
//! broadcast events. Every logged event gets an offset appended as its last
//! argument; a client reconnecting with its private id and the last offset
//! it saw gets back every later event it would have received.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::domain::broadcast::BroadcastOptions;
use crate::domain::foundation::{PrivateId, Timestamp};
use crate::domain::protocol::{Packet, PacketType};
use crate::domain::session::{PersistedPacket, RecoveryOptions, RestoredSession, Session};
use crate::sync::lock;

/// Interval between two pruning passes.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct StoreState {
    sessions: HashMap<PrivateId, Session>,
    packets: VecDeque<PersistedPacket>,
}

#[derive(Debug)]
pub struct SessionStore {
    state: Mutex<StoreState>,
    max_disconnection: Duration,
    max_packets: usize,
}

impl SessionStore {
    pub fn new(max_disconnection: Duration, max_packets: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            max_disconnection,
            max_packets,
        }
    }

    pub fn from_options(options: &RecoveryOptions) -> Self {
        Self::new(options.max_disconnection_duration, options.max_packets)
    }

    pub fn max_disconnection(&self) -> Duration {
        self.max_disconnection
    }

    /// Logs an event for replay and appends its offset to the arguments.
    ///
    /// Packets expecting an acknowledgement and volatile packets are not
    /// replayable and are left untouched.
    pub fn record(&self, packet: &mut Packet, opts: &BroadcastOptions) {
        let replayable =
            packet.kind == PacketType::Event && packet.id.is_none() && opts.flags.volatile.is_none();
        if !replayable {
            return;
        }

        let offset = Uuid::new_v4().simple().to_string();
        packet.push_arg(Value::String(offset.clone()));

        let mut state = lock(&self.state);
        state.packets.push_back(PersistedPacket {
            offset,
            emitted_at: Timestamp::now(),
            packet: packet.clone(),
            opts: opts.clone(),
        });
        while state.packets.len() > self.max_packets {
            state.packets.pop_front();
        }
    }

    pub fn persist(&self, session: Session) {
        tracing::debug!(sid = %session.sid, "persisting session");
        lock(&self.state)
            .sessions
            .insert(session.pid.clone(), session);
    }

    pub fn restore(&self, pid: &PrivateId, offset: &str) -> Option<RestoredSession> {
        self.restore_at(pid, offset, &Timestamp::now())
    }

    fn restore_at(&self, pid: &PrivateId, offset: &str, now: &Timestamp) -> Option<RestoredSession> {
        let mut state = lock(&self.state);

        let session = state.sessions.get(pid)?.clone();
        if session.disconnected_at.has_expired(self.max_disconnection, now) {
            tracing::debug!(sid = %session.sid, "session has expired");
            state.sessions.remove(pid);
            return None;
        }

        let index = state.packets.iter().position(|p| p.offset == offset)?;
        let missed_packets = state
            .packets
            .iter()
            .skip(index + 1)
            .filter(|p| p.is_visible_to(&session.rooms))
            .map(|p| p.packet.clone())
            .collect();

        Some(RestoredSession {
            session,
            missed_packets,
        })
    }

    /// Drops expired sessions and packets.
    pub fn prune(&self) {
        self.prune_at(&Timestamp::now());
    }

    fn prune_at(&self, now: &Timestamp) {
        let window = self.max_disconnection;
        let mut state = lock(&self.state);
        state
            .sessions
            .retain(|_, session| !session.disconnected_at.has_expired(window, now));
        while state
            .packets
            .front()
            .is_some_and(|p| p.emitted_at.has_expired(window, now))
        {
            state.packets.pop_front();
        }
    }

    pub fn session_count(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    pub fn packet_count(&self) -> usize {
        lock(&self.state).packets.len()
    }
}
