//! Test doubles for adapter tests: a namespace-like directory and sockets
//! that record what they are sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::{json, Value};

use crate::domain::broadcast::Room;
use crate::domain::foundation::Sid;
use crate::domain::protocol::Packet;
use crate::domain::session::{Handshake, SocketDetails};
use crate::ports::{AckCallback, Adapter, AdapterListener, LocalSocket, ServerAck, SocketDirectory};

pub struct FakeDirectory {
    tag: String,
    adapter: Arc<dyn Adapter>,
    sockets: Mutex<HashMap<Sid, Arc<FakeSocket>>>,
    next_ack: AtomicU64,
    server_events: Mutex<Vec<Vec<Value>>>,
    me: Weak<FakeDirectory>,
}

impl FakeDirectory {
    /// Builds a directory for the main namespace; `tag` identifies the node
    /// in server-side emit replies.
    pub fn new<F>(tag: &str, factory: F) -> Arc<Self>
    where
        F: FnOnce(&str, Weak<dyn SocketDirectory>) -> Arc<dyn Adapter>,
    {
        Arc::new_cyclic(|me: &Weak<FakeDirectory>| {
            let directory: Weak<dyn SocketDirectory> = me.clone();
            Self {
                tag: tag.to_string(),
                adapter: factory("/", directory),
                sockets: Mutex::new(HashMap::new()),
                next_ack: AtomicU64::new(0),
                server_events: Mutex::new(Vec::new()),
                me: me.clone(),
            }
        })
    }

    pub fn adapter(&self) -> Arc<dyn Adapter> {
        Arc::clone(&self.adapter)
    }

    /// Attaches a socket and joins it to its own room.
    pub fn connect(&self, id: &str) -> Arc<FakeSocket> {
        let socket = Arc::new(FakeSocket {
            id: Sid::from(id),
            directory: self.me.clone(),
            delivered: Mutex::new(Vec::new()),
            volatile_writes: AtomicUsize::new(0),
            acks: Mutex::new(HashMap::new()),
            disconnected: AtomicBool::new(false),
        });
        self.sockets
            .lock()
            .unwrap()
            .insert(socket.id.clone(), Arc::clone(&socket));
        self.adapter.add_all(&socket.id, &[Room::from(id)]);
        socket
    }

    pub fn server_events(&self) -> Vec<Vec<Value>> {
        self.server_events.lock().unwrap().clone()
    }
}

impl SocketDirectory for FakeDirectory {
    fn name(&self) -> &str {
        "/"
    }

    fn socket(&self, id: &Sid) -> Option<Arc<dyn LocalSocket>> {
        let socket = self.sockets.lock().unwrap().get(id).cloned()?;
        Some(socket)
    }

    fn next_ack_id(&self) -> u64 {
        self.next_ack.fetch_add(1, Ordering::SeqCst)
    }

    fn on_server_side_emit(&self, data: Vec<Value>, ack: Option<ServerAck>) {
        self.server_events.lock().unwrap().push(data);
        if let Some(ack) = ack {
            ack(json!(self.tag));
        }
    }
}

pub struct FakeSocket {
    id: Sid,
    directory: Weak<FakeDirectory>,
    delivered: Mutex<Vec<Packet>>,
    volatile_writes: AtomicUsize,
    acks: Mutex<HashMap<u64, AckCallback>>,
    disconnected: AtomicBool,
}

impl FakeSocket {
    pub fn delivered(&self) -> Vec<Packet> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn volatile_writes(&self) -> usize {
        self.volatile_writes.load(Ordering::SeqCst)
    }

    /// Answers acknowledgement `id` as a client would.
    pub fn ack(&self, id: u64, args: Vec<Value>) {
        let callback = self.acks.lock().unwrap().remove(&id);
        if let Some(callback) = callback {
            callback(args);
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn adapter(&self) -> Option<Arc<dyn Adapter>> {
        self.directory.upgrade().map(|dir| dir.adapter())
    }
}

impl LocalSocket for FakeSocket {
    fn id(&self) -> &Sid {
        &self.id
    }

    fn deliver(&self, packet: &Packet, _encoded: &str, volatile: bool) {
        if volatile {
            self.volatile_writes.fetch_add(1, Ordering::SeqCst);
        }
        self.delivered.lock().unwrap().push(packet.clone());
    }

    fn register_ack(&self, id: u64, ack: AckCallback) {
        self.acks.lock().unwrap().insert(id, ack);
    }

    fn join(&self, rooms: &[Room]) {
        if let Some(adapter) = self.adapter() {
            adapter.add_all(&self.id, rooms);
        }
    }

    fn leave(&self, room: &Room) {
        if let Some(adapter) = self.adapter() {
            adapter.del(&self.id, room);
        }
    }

    fn disconnect(&self, _close: bool) {
        self.disconnected.store(true, Ordering::SeqCst);
        if let Some(dir) = self.directory.upgrade() {
            dir.sockets.lock().unwrap().remove(&self.id);
            dir.adapter.del_all(&self.id);
        }
    }

    fn details(&self) -> SocketDetails {
        let mut rooms: Vec<Room> = self
            .adapter()
            .and_then(|adapter| adapter.socket_rooms(&self.id))
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();
        rooms.sort();
        SocketDetails {
            id: self.id.clone(),
            handshake: Handshake::default(),
            rooms,
            data: Value::Null,
        }
    }
}

/// Records room lifecycle notifications as short strings.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
    errors: AtomicUsize,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

impl AdapterListener for RecordingListener {
    fn on_create_room(&self, room: &Room) {
        self.events.lock().unwrap().push(format!("create {}", room));
    }

    fn on_delete_room(&self, room: &Room) {
        self.events.lock().unwrap().push(format!("delete {}", room));
    }

    fn on_join_room(&self, room: &Room, sid: &Sid) {
        self.events.lock().unwrap().push(format!("join {} {}", room, sid));
    }

    fn on_leave_room(&self, room: &Room, sid: &Sid) {
        self.events.lock().unwrap().push(format!("leave {} {}", room, sid));
    }

    fn on_error(&self, _error: &crate::ports::AdapterError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}
