//! In-memory room adapter.
//!
//! Holds the room indices of one namespace and fans packets out to the
//! namespace's local sockets. It is the single-node adapter and the local
//! half of every clustered adapter.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::domain::broadcast::{BroadcastOptions, Room};
use crate::domain::foundation::{PrivateId, Shortfall, Sid};
use crate::domain::protocol::Packet;
use crate::domain::session::{RecoveryOptions, RestoredSession, Session, SocketDetails};
use crate::ports::{
    AckCallback, Adapter, AdapterError, AdapterFactory, AdapterListener, ClientCountCallback,
    LocalSocket, SocketDirectory,
};
use crate::sync::{lock, read, write};

use super::index::{RoomEvent, RoomIndex};
use super::sessions::{SessionStore, PRUNE_INTERVAL};

/// Factory of single-node adapters; each namespace gets its own recovery
/// log when `recovery` is set.
pub fn in_memory_adapter(recovery: Option<RecoveryOptions>) -> AdapterFactory {
    Arc::new(move |nsp: &str, directory: Weak<dyn SocketDirectory>| -> Arc<dyn Adapter> {
        let adapter = InMemoryAdapter::new(nsp, directory);
        let adapter = match &recovery {
            Some(options) => {
                adapter.with_sessions(Arc::new(SessionStore::from_options(options)))
            }
            None => adapter,
        };
        Arc::new(adapter)
    })
}

pub struct InMemoryAdapter {
    nsp: String,
    directory: Weak<dyn SocketDirectory>,
    index: Mutex<RoomIndex>,
    listeners: RwLock<Vec<Arc<dyn AdapterListener>>>,
    sessions: Option<Arc<SessionStore>>,
    pruner: Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryAdapter {
    pub fn new(nsp: &str, directory: Weak<dyn SocketDirectory>) -> Self {
        Self {
            nsp: nsp.to_string(),
            directory,
            index: Mutex::new(RoomIndex::new()),
            listeners: RwLock::new(Vec::new()),
            sessions: None,
            pruner: Mutex::new(None),
        }
    }

    /// Enables connection state recovery backed by `store`.
    pub fn with_sessions(mut self, store: Arc<SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn nsp(&self) -> &str {
        &self.nsp
    }

    pub fn directory(&self) -> Option<Arc<dyn SocketDirectory>> {
        self.directory.upgrade()
    }

    /// Live local sockets selected by `opts`.
    ///
    /// The index lock is released before this returns, so callers may invoke
    /// socket methods that re-enter the adapter.
    pub fn local_sockets(&self, opts: &BroadcastOptions) -> Vec<Arc<dyn LocalSocket>> {
        let Some(directory) = self.directory() else {
            return Vec::new();
        };
        let ids = lock(&self.index).matching(opts);
        ids.iter().filter_map(|id| directory.socket(id)).collect()
    }

    pub fn local_details(&self, opts: &BroadcastOptions) -> Vec<SocketDetails> {
        self.local_sockets(opts)
            .iter()
            .map(|socket| socket.details())
            .collect()
    }

    pub fn room_count(&self) -> usize {
        lock(&self.index).room_count()
    }

    /// Reports an error to every listener.
    pub fn notify_error(&self, error: &AdapterError) {
        tracing::error!(nsp = %self.nsp, error = %error, "adapter error");
        for listener in self.listeners() {
            listener.on_error(error);
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn AdapterListener>> {
        read(&self.listeners).clone()
    }

    fn notify(&self, events: Vec<RoomEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners();
        for event in &events {
            for listener in &listeners {
                match event {
                    RoomEvent::Created(room) => listener.on_create_room(room),
                    RoomEvent::Deleted(room) => listener.on_delete_room(room),
                    RoomEvent::Joined(room, id) => listener.on_join_room(room, id),
                    RoomEvent::Left(room, id) => listener.on_leave_room(room, id),
                }
            }
        }
    }
}

#[async_trait]
impl Adapter for InMemoryAdapter {
    async fn init(&self) -> Result<(), AdapterError> {
        let Some(store) = self.sessions.clone() else {
            return Ok(());
        };
        let mut pruner = lock(&self.pruner);
        if pruner.is_none() {
            *pruner = Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(PRUNE_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    store.prune();
                }
            }));
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(pruner) = lock(&self.pruner).take() {
            pruner.abort();
        }
    }

    async fn server_count(&self) -> usize {
        1
    }

    fn add_all(&self, id: &Sid, rooms: &[Room]) {
        let events = lock(&self.index).add_all(id, rooms);
        self.notify(events);
    }

    fn del(&self, id: &Sid, room: &Room) {
        let events = lock(&self.index).del(id, room);
        self.notify(events);
    }

    fn del_all(&self, id: &Sid) {
        let events = lock(&self.index).del_all(id);
        self.notify(events);
    }

    fn socket_rooms(&self, id: &Sid) -> Option<HashSet<Room>> {
        lock(&self.index).socket_rooms(id)
    }

    fn has_room(&self, room: &Room) -> bool {
        lock(&self.index).has_room(room)
    }

    fn broadcast(&self, mut packet: Packet, opts: &BroadcastOptions) {
        packet.nsp = self.nsp.clone();
        if let Some(store) = &self.sessions {
            store.record(&mut packet, opts);
        }

        let encoded = packet.encode();
        let volatile = opts.flags.is_volatile();
        for socket in self.local_sockets(opts) {
            socket.deliver(&packet, &encoded, volatile);
        }
    }

    fn broadcast_with_ack(
        &self,
        mut packet: Packet,
        opts: &BroadcastOptions,
        on_client_count: ClientCountCallback,
        on_ack: AckCallback,
    ) {
        let Some(directory) = self.directory() else {
            on_client_count(0);
            return;
        };
        packet.nsp = self.nsp.clone();
        let id = directory.next_ack_id();
        packet.id = Some(id);

        let encoded = packet.encode();
        let volatile = opts.flags.is_volatile();
        let sockets = self.local_sockets(opts);
        for socket in &sockets {
            socket.register_ack(id, Arc::clone(&on_ack));
            socket.deliver(&packet, &encoded, volatile);
        }
        on_client_count(sockets.len());
    }

    async fn fetch_sockets(
        &self,
        opts: &BroadcastOptions,
    ) -> Result<Vec<SocketDetails>, Shortfall<SocketDetails>> {
        Ok(self.local_details(opts))
    }

    fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        for socket in self.local_sockets(opts) {
            socket.join(rooms);
        }
    }

    fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        for socket in self.local_sockets(opts) {
            for room in rooms {
                socket.leave(room);
            }
        }
    }

    fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool) {
        for socket in self.local_sockets(opts) {
            socket.disconnect(close);
        }
    }

    fn server_side_emit(&self, data: Vec<Value>) {
        tracing::warn!(
            nsp = %self.nsp,
            event = ?data.first(),
            "server-side emit ignored: no other node to reach"
        );
    }

    async fn server_side_emit_with_ack(
        &self,
        data: Vec<Value>,
        _timeout: Duration,
    ) -> Result<Vec<Value>, Shortfall<Value>> {
        self.server_side_emit(data);
        Ok(Vec::new())
    }

    fn persist_session(&self, session: Session) {
        if let Some(store) = &self.sessions {
            store.persist(session);
        }
    }

    fn restore_session(&self, pid: &PrivateId, offset: &str) -> Option<RestoredSession> {
        self.sessions.as_ref()?.restore(pid, offset)
    }

    fn subscribe(&self, listener: Arc<dyn AdapterListener>) {
        write(&self.listeners).push(listener);
    }
}

impl Drop for InMemoryAdapter {
    fn drop(&mut self) {
        if let Some(pruner) = lock(&self.pruner).take() {
            pruner.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rooms::testing::{FakeDirectory, RecordingListener};
    use crate::domain::broadcast::BroadcastFlags;
    use crate::domain::protocol::PacketType;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn local_directory() -> Arc<FakeDirectory> {
        FakeDirectory::new("node", |nsp, directory| {
            Arc::new(InMemoryAdapter::new(nsp, directory))
        })
    }

    #[tokio::test]
    async fn broadcast_reaches_each_matching_socket_once() {
        let dir = local_directory();
        let s1 = dir.connect("s1");
        let s2 = dir.connect("s2");
        let s3 = dir.connect("s3");
        s1.join(&[Room::from("a"), Room::from("b")]);
        s2.join(&[Room::from("b")]);

        dir.adapter()
            .broadcast(Packet::event("/", "hi", vec![]), &BroadcastOptions::to_rooms(["a", "b"]));

        assert_eq!(s1.delivered().len(), 1);
        assert_eq!(s2.delivered().len(), 1);
        assert!(s3.delivered().is_empty());
    }

    #[tokio::test]
    async fn broadcast_sets_namespace() {
        let dir = local_directory();
        let s1 = dir.connect("s1");

        dir.adapter()
            .broadcast(Packet::event("/other", "hi", vec![]), &BroadcastOptions::new());

        assert_eq!(s1.delivered()[0].nsp, "/");
    }

    #[tokio::test]
    async fn volatile_flag_is_carried_to_sockets() {
        let dir = local_directory();
        let s1 = dir.connect("s1");
        let opts = BroadcastOptions::new().with_flags(BroadcastFlags {
            volatile: Some(true),
            ..Default::default()
        });

        dir.adapter().broadcast(Packet::event("/", "hi", vec![]), &opts);

        assert_eq!(s1.volatile_writes(), 1);
    }

    #[tokio::test]
    async fn broadcast_with_ack_counts_clients_before_acks() {
        let dir = local_directory();
        let s1 = dir.connect("s1");
        let s2 = dir.connect("s2");

        let count = Arc::new(AtomicUsize::new(usize::MAX));
        let acks = Arc::new(Mutex::new(Vec::new()));
        let count_seen = Arc::clone(&count);
        let acks_seen = Arc::clone(&acks);

        dir.adapter().broadcast_with_ack(
            Packet::event("/", "ping", vec![]),
            &BroadcastOptions::new(),
            Arc::new(move |n| count_seen.store(n, Ordering::SeqCst)),
            Arc::new(move |args| acks_seen.lock().unwrap().push(args)),
        );
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(acks.lock().unwrap().is_empty());

        let packet = &s1.delivered()[0];
        assert_eq!(packet.kind, PacketType::Event);
        let id = packet.id.unwrap();
        assert_eq!(s2.delivered()[0].id, Some(id));

        s1.ack(id, vec![json!("pong")]);
        s2.ack(id, vec![json!("pong")]);
        assert_eq!(acks.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn add_and_del_sockets_apply_to_matches() {
        let dir = local_directory();
        dir.connect("s1");
        dir.connect("s2");
        let adapter = dir.adapter();

        adapter.add_sockets(&BroadcastOptions::to_rooms(["s1"]), &[Room::from("vip")]);
        assert!(adapter.socket_rooms(&Sid::from("s1")).unwrap().contains(&Room::from("vip")));
        assert!(!adapter.socket_rooms(&Sid::from("s2")).unwrap().contains(&Room::from("vip")));

        adapter.del_sockets(&BroadcastOptions::new(), &[Room::from("vip")]);
        assert!(!adapter.has_room(&Room::from("vip")));
    }

    #[tokio::test]
    async fn disconnect_sockets_removes_them() {
        let dir = local_directory();
        let s1 = dir.connect("s1");
        dir.connect("s2");

        dir.adapter()
            .disconnect_sockets(&BroadcastOptions::to_rooms(["s1"]), true);

        assert!(s1.is_disconnected());
        let remaining = dir.adapter().fetch_sockets(&BroadcastOptions::new()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, Sid::from("s2"));
    }

    #[tokio::test]
    async fn listeners_see_room_lifecycle() {
        let dir = local_directory();
        let listener = Arc::new(RecordingListener::default());
        dir.adapter().subscribe(listener.clone());

        let s1 = dir.connect("s1");
        s1.join(&[Room::from("a")]);
        s1.join(&[Room::from("a")]);
        s1.leave(&Room::from("a"));

        assert_eq!(
            listener.events(),
            vec![
                "create s1",
                "join s1 s1",
                "create a",
                "join a s1",
                "leave a s1",
                "delete a",
            ]
        );
    }

    #[tokio::test]
    async fn single_node_reports_one_server() {
        let dir = local_directory();
        assert_eq!(dir.adapter().server_count().await, 1);
        let replies = dir
            .adapter()
            .server_side_emit_with_ack(vec![json!("hello")], Duration::from_millis(10))
            .await
            .unwrap();
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_recorded_only_when_enabled() {
        let dir = local_directory();
        let s1 = dir.connect("s1");
        dir.adapter()
            .broadcast(Packet::event("/", "hi", vec![]), &BroadcastOptions::new());
        assert_eq!(s1.delivered()[0].args().len(), 1);

        let store = Arc::new(SessionStore::new(Duration::from_secs(60), 10));
        let adapter_store = Arc::clone(&store);
        let recovering = FakeDirectory::new("node", move |nsp, directory| {
            Arc::new(InMemoryAdapter::new(nsp, directory).with_sessions(adapter_store))
        });
        let s1 = recovering.connect("s1");
        recovering
            .adapter()
            .broadcast(Packet::event("/", "hi", vec![]), &BroadcastOptions::new());
        assert_eq!(s1.delivered()[0].args().len(), 2);
        assert_eq!(store.packet_count(), 1);
    }
}
