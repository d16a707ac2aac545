//! Cluster-aware room adapter.
//!
//! Wraps an [`InMemoryAdapter`] and replicates every mutating call to the
//! other nodes of the cluster through a [`ClusterTransport`]. Queries that
//! need answers from peers (fetching sockets, server-side emits with
//! acknowledgement) are correlated by request id and bounded by a timeout.
//!
//! ```text
//!   node A                         bus                        node B
//!   add_sockets ─► local effect
//!              └─► publish_request ──────────► on_request ─► local effect
//!   fetch_sockets ─► publish_request ────────► on_request
//!        ▲                                         │
//!        └──── on_response ◄──── publish_response ─┘
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::domain::broadcast::{BroadcastOptions, Room};
use crate::domain::cluster::{ClusterMessage, ClusterRequest, ClusterResponse};
use crate::domain::foundation::{PrivateId, RequestId, ServerUid, Shortfall, Sid};
use crate::domain::protocol::Packet;
use crate::domain::session::{RestoredSession, Session, SocketDetails};
use crate::ports::{
    AckCallback, Adapter, AdapterError, AdapterListener, ClientCountCallback, ServerAck,
};
use crate::sync::lock;

use super::memory::InMemoryAdapter;
use super::timers::TimerSet;

/// Default deadline for cluster round trips.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Receiving side of a cluster adapter, driven by its transport.
pub trait ClusterInbox: Send + Sync {
    fn on_request(&self, message: ClusterMessage);

    fn on_response(&self, response: ClusterResponse);

    /// Whether the room exists on this node.
    fn has_room(&self, room: &Room) -> bool;

    fn on_error(&self, error: AdapterError);
}

/// Moves cluster messages between nodes.
///
/// Publishing never blocks: requests from one node must reach the bus in
/// the order they were published, and failures are reported to the inbox.
#[async_trait]
pub trait ClusterTransport: Send + Sync + 'static {
    fn publish_request(&self, message: ClusterMessage);

    fn publish_response(&self, requester: &ServerUid, response: ClusterResponse);

    /// Number of nodes listening, including this one.
    async fn server_count(&self) -> Result<usize, AdapterError>;

    /// Starts feeding inbound messages to `inbox`.
    async fn listen(&self, inbox: Weak<dyn ClusterInbox>) -> Result<(), AdapterError>;

    async fn close(&self);
}

struct Pending<T> {
    expected: usize,
    current: usize,
    items: Vec<T>,
    done: oneshot::Sender<Vec<T>>,
}

impl<T> Pending<T> {
    fn new(expected: usize, done: oneshot::Sender<Vec<T>>) -> Self {
        Self {
            expected,
            current: 0,
            items: Vec::new(),
            done,
        }
    }

    fn finish(self) {
        let _ = self.done.send(self.items);
    }
}

enum PendingRequest {
    Fetch(Pending<SocketDetails>),
    Emit(Pending<Value>),
}

impl PendingRequest {
    fn is_complete(&self) -> bool {
        match self {
            PendingRequest::Fetch(p) => p.current >= p.expected,
            PendingRequest::Emit(p) => p.current >= p.expected,
        }
    }

    fn finish(self) {
        match self {
            PendingRequest::Fetch(p) => p.finish(),
            PendingRequest::Emit(p) => p.finish(),
        }
    }
}

/// Callbacks of a broadcast-with-ack awaiting answers from other nodes.
#[derive(Clone)]
struct AckRequest {
    on_client_count: ClientCountCallback,
    on_ack: AckCallback,
}

pub struct ClusterAdapter<T: ClusterTransport> {
    local: InMemoryAdapter,
    uid: ServerUid,
    transport: T,
    request_timeout: Duration,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    ack_requests: Mutex<HashMap<RequestId, AckRequest>>,
    timers: TimerSet<RequestId>,
    me: Weak<Self>,
}

impl<T: ClusterTransport> ClusterAdapter<T> {
    pub fn new(
        local: InMemoryAdapter,
        uid: ServerUid,
        transport: T,
        request_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            local,
            uid,
            transport,
            request_timeout,
            pending: Mutex::new(HashMap::new()),
            ack_requests: Mutex::new(HashMap::new()),
            timers: TimerSet::new(),
            me: me.clone(),
        })
    }

    pub fn uid(&self) -> &ServerUid {
        &self.uid
    }

    /// Round trips and broadcast acknowledgements still awaiting answers.
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len() + lock(&self.ack_requests).len()
    }

    fn publish(&self, request: ClusterRequest) {
        self.transport
            .publish_request(ClusterMessage::new(self.uid.clone(), request));
    }

    fn respond(&self, requester: &ServerUid, response: ClusterResponse) {
        self.transport.publish_response(requester, response);
    }

    /// Publishes a request and waits until every expected peer answered or
    /// the deadline passed. Returns the answers and the number of peers that
    /// responded.
    async fn round_trip<R>(
        &self,
        request_id: RequestId,
        request: ClusterRequest,
        pending: PendingRequest,
        rx: oneshot::Receiver<Vec<R>>,
        timeout: Duration,
        take_partial: fn(PendingRequest) -> Option<(usize, Vec<R>)>,
    ) -> Result<Vec<R>, (usize, Vec<R>)> {
        lock(&self.pending).insert(request_id.clone(), pending);
        self.publish(request);

        let mut rx = rx;
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(items)) => Ok(items),
            _ => {
                let partial = lock(&self.pending).remove(&request_id);
                match partial.and_then(take_partial) {
                    Some(partial) => Err(partial),
                    // Completed between the deadline and the removal.
                    None => rx.try_recv().map_err(|_| (0, Vec::new())),
                }
            }
        }
    }

    fn forward_ack_request(&self, requester: ServerUid, request_id: RequestId) -> AckRequest {
        let me = self.me.clone();
        let count_requester = requester.clone();
        let count_request_id = request_id.clone();
        let on_client_count: ClientCountCallback = Arc::new(move |client_count| {
            if let Some(this) = me.upgrade() {
                this.respond(
                    &count_requester,
                    ClusterResponse::BroadcastClientCount {
                        request_id: count_request_id.clone(),
                        client_count,
                    },
                );
            }
        });

        let me = self.me.clone();
        let on_ack: AckCallback = Arc::new(move |args| {
            if let Some(this) = me.upgrade() {
                this.respond(
                    &requester,
                    ClusterResponse::BroadcastAck {
                        request_id: request_id.clone(),
                        packet: Value::Array(args),
                    },
                );
            }
        });

        AckRequest {
            on_client_count,
            on_ack,
        }
    }

    fn server_ack(&self, requester: ServerUid, request_id: RequestId) -> ServerAck {
        let me = self.me.clone();
        Box::new(move |data| {
            if let Some(this) = me.upgrade() {
                this.respond(&requester, ClusterResponse::ServerSideEmit { request_id, data });
            }
        })
    }

    fn record_response(&self, request_id: &RequestId, apply: impl FnOnce(&mut PendingRequest) -> bool) {
        let mut pending = lock(&self.pending);
        let Some(entry) = pending.get_mut(request_id) else {
            tracing::debug!(request_id = %request_id, "response for unknown request ignored");
            return;
        };
        if !apply(entry) {
            tracing::warn!(request_id = %request_id, "response type does not match request");
            return;
        }
        if entry.is_complete() {
            if let Some(entry) = pending.remove(request_id) {
                entry.finish();
            }
        }
    }
}

fn merge_sockets(local: Vec<SocketDetails>, remote: Vec<SocketDetails>) -> Vec<SocketDetails> {
    let mut seen = HashSet::new();
    local
        .into_iter()
        .chain(remote)
        .filter(|socket| seen.insert(socket.id.clone()))
        .collect()
}

fn take_fetch(pending: PendingRequest) -> Option<(usize, Vec<SocketDetails>)> {
    match pending {
        PendingRequest::Fetch(p) => Some((p.current, p.items)),
        PendingRequest::Emit(_) => None,
    }
}

fn take_emit(pending: PendingRequest) -> Option<(usize, Vec<Value>)> {
    match pending {
        PendingRequest::Emit(p) => Some((p.current, p.items)),
        PendingRequest::Fetch(_) => None,
    }
}

#[async_trait]
impl<T: ClusterTransport> Adapter for ClusterAdapter<T> {
    async fn init(&self) -> Result<(), AdapterError> {
        self.local.init().await?;
        let inbox: Weak<dyn ClusterInbox> = self.me.clone();
        self.transport.listen(inbox).await?;
        tracing::info!(uid = %self.uid, nsp = %self.local.nsp(), "cluster adapter ready");
        Ok(())
    }

    async fn close(&self) {
        self.timers.cancel_all();
        lock(&self.ack_requests).clear();
        // Dropping the senders resolves every waiter with what it has.
        lock(&self.pending).clear();
        self.transport.close().await;
        self.local.close().await;
    }

    async fn server_count(&self) -> usize {
        match self.transport.server_count().await {
            Ok(count) => count.max(1),
            Err(error) => {
                self.local.notify_error(&error);
                1
            }
        }
    }

    fn add_all(&self, id: &Sid, rooms: &[Room]) {
        self.local.add_all(id, rooms);
    }

    fn del(&self, id: &Sid, room: &Room) {
        self.local.del(id, room);
    }

    fn del_all(&self, id: &Sid) {
        self.local.del_all(id);
    }

    fn socket_rooms(&self, id: &Sid) -> Option<HashSet<Room>> {
        self.local.socket_rooms(id)
    }

    fn has_room(&self, room: &Room) -> bool {
        self.local.has_room(room)
    }

    fn broadcast(&self, packet: Packet, opts: &BroadcastOptions) {
        if !opts.flags.is_local() {
            self.publish(ClusterRequest::Broadcast {
                packet: packet.clone(),
                opts: opts.clone(),
                request_id: None,
            });
        }
        self.local.broadcast(packet, opts);
    }

    fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: &BroadcastOptions,
        on_client_count: ClientCountCallback,
        on_ack: AckCallback,
    ) {
        if !opts.flags.is_local() {
            let request_id = RequestId::new();
            lock(&self.ack_requests).insert(
                request_id.clone(),
                AckRequest {
                    on_client_count: Arc::clone(&on_client_count),
                    on_ack: Arc::clone(&on_ack),
                },
            );
            self.publish(ClusterRequest::Broadcast {
                packet: packet.clone(),
                opts: opts.clone(),
                request_id: Some(request_id.clone()),
            });

            let me = self.me.clone();
            let expired = request_id.clone();
            let timeout = opts.flags.timeout().unwrap_or(self.request_timeout);
            self.timers.schedule(request_id, timeout, move || {
                if let Some(this) = me.upgrade() {
                    lock(&this.ack_requests).remove(&expired);
                }
            });
        }
        self.local
            .broadcast_with_ack(packet, opts, on_client_count, on_ack);
    }

    async fn fetch_sockets(
        &self,
        opts: &BroadcastOptions,
    ) -> Result<Vec<SocketDetails>, Shortfall<SocketDetails>> {
        let local = self.local.local_details(opts);
        if opts.flags.is_local() {
            return Ok(local);
        }

        let expected = self.server_count().await - 1;
        if expected == 0 {
            return Ok(local);
        }

        let request_id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        let timeout = opts.flags.timeout().unwrap_or(self.request_timeout);
        let result = self
            .round_trip(
                request_id.clone(),
                ClusterRequest::FetchSockets {
                    request_id,
                    opts: opts.clone(),
                },
                PendingRequest::Fetch(Pending::new(expected, tx)),
                rx,
                timeout,
                take_fetch,
            )
            .await;

        match result {
            Ok(remote) => Ok(merge_sockets(local, remote)),
            Err((received, partial)) => Err(Shortfall::with_received(
                expected,
                received,
                merge_sockets(local, partial),
            )),
        }
    }

    fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        if !opts.flags.is_local() {
            self.publish(ClusterRequest::SocketsJoin {
                opts: opts.clone(),
                rooms: rooms.to_vec(),
            });
        }
        self.local.add_sockets(opts, rooms);
    }

    fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        if !opts.flags.is_local() {
            self.publish(ClusterRequest::SocketsLeave {
                opts: opts.clone(),
                rooms: rooms.to_vec(),
            });
        }
        self.local.del_sockets(opts, rooms);
    }

    fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool) {
        if !opts.flags.is_local() {
            self.publish(ClusterRequest::DisconnectSockets {
                opts: opts.clone(),
                close,
            });
        }
        self.local.disconnect_sockets(opts, close);
    }

    fn server_side_emit(&self, data: Vec<Value>) {
        self.publish(ClusterRequest::ServerSideEmit {
            request_id: None,
            data,
        });
    }

    async fn server_side_emit_with_ack(
        &self,
        data: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>, Shortfall<Value>> {
        let expected = self.server_count().await - 1;
        if expected == 0 {
            return Ok(Vec::new());
        }

        let request_id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        self.round_trip(
            request_id.clone(),
            ClusterRequest::ServerSideEmit {
                request_id: Some(request_id),
                data,
            },
            PendingRequest::Emit(Pending::new(expected, tx)),
            rx,
            timeout,
            take_emit,
        )
        .await
        .map_err(|(received, partial)| Shortfall::with_received(expected, received, partial))
    }

    fn persist_session(&self, session: Session) {
        self.local.persist_session(session);
    }

    fn restore_session(&self, pid: &PrivateId, offset: &str) -> Option<RestoredSession> {
        self.local.restore_session(pid, offset)
    }

    fn subscribe(&self, listener: Arc<dyn AdapterListener>) {
        self.local.subscribe(listener);
    }
}

impl<T: ClusterTransport> ClusterInbox for ClusterAdapter<T> {
    fn on_request(&self, message: ClusterMessage) {
        if message.uid == self.uid {
            tracing::trace!(uid = %self.uid, "ignoring own request");
            return;
        }
        tracing::debug!(
            uid = %self.uid,
            from = %message.uid,
            kind = ?message.request.request_type(),
            "cluster request received"
        );

        let requester = message.uid;
        match message.request {
            ClusterRequest::Broadcast {
                packet,
                opts,
                request_id: None,
            } => self.local.broadcast(packet, &opts),
            ClusterRequest::Broadcast {
                packet,
                opts,
                request_id: Some(request_id),
            } => {
                let forward = self.forward_ack_request(requester, request_id);
                self.local
                    .broadcast_with_ack(packet, &opts, forward.on_client_count, forward.on_ack);
            }
            ClusterRequest::SocketsJoin { opts, rooms } => self.local.add_sockets(&opts, &rooms),
            ClusterRequest::SocketsLeave { opts, rooms } => self.local.del_sockets(&opts, &rooms),
            ClusterRequest::DisconnectSockets { opts, close } => {
                self.local.disconnect_sockets(&opts, close)
            }
            ClusterRequest::FetchSockets { request_id, opts } => {
                let sockets = self.local.local_details(&opts);
                self.respond(
                    &requester,
                    ClusterResponse::FetchSockets {
                        request_id,
                        sockets,
                    },
                );
            }
            ClusterRequest::ServerSideEmit { request_id, data } => {
                let Some(directory) = self.local.directory() else {
                    return;
                };
                let ack = request_id.map(|id| self.server_ack(requester, id));
                directory.on_server_side_emit(data, ack);
            }
        }
    }

    fn on_response(&self, response: ClusterResponse) {
        tracing::debug!(
            uid = %self.uid,
            request_id = %response.request_id(),
            kind = ?response.response_type(),
            "cluster response received"
        );

        match response {
            ClusterResponse::FetchSockets {
                request_id,
                sockets,
            } => self.record_response(&request_id, |entry| match entry {
                PendingRequest::Fetch(p) => {
                    p.current += 1;
                    p.items.extend(sockets);
                    true
                }
                PendingRequest::Emit(_) => false,
            }),
            ClusterResponse::ServerSideEmit { request_id, data } => {
                self.record_response(&request_id, |entry| match entry {
                    PendingRequest::Emit(p) => {
                        p.current += 1;
                        p.items.push(data);
                        true
                    }
                    PendingRequest::Fetch(_) => false,
                })
            }
            ClusterResponse::BroadcastClientCount {
                request_id,
                client_count,
            } => {
                let request = lock(&self.ack_requests).get(&request_id).cloned();
                if let Some(request) = request {
                    (request.on_client_count)(client_count);
                }
            }
            ClusterResponse::BroadcastAck { request_id, packet } => {
                let request = lock(&self.ack_requests).get(&request_id).cloned();
                if let Some(request) = request {
                    let args = match packet {
                        Value::Array(args) => args,
                        other => vec![other],
                    };
                    (request.on_ack)(args);
                }
            }
        }
    }

    fn has_room(&self, room: &Room) -> bool {
        self.local.has_room(room)
    }

    fn on_error(&self, error: AdapterError) {
        self.local.notify_error(&error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rooms::testing::{FakeDirectory, RecordingListener};
    use crate::ports::LocalSocket;
    use crate::domain::broadcast::BroadcastFlags;
    use crate::ports::PubSubError;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Delivers messages synchronously between nodes of one process.
    #[derive(Default)]
    struct Bus {
        nodes: Mutex<Vec<(ServerUid, Weak<dyn ClusterInbox>, bool)>>,
        count_fails: AtomicBool,
    }

    impl Bus {
        fn inboxes(&self) -> Vec<(ServerUid, Arc<dyn ClusterInbox>, bool)> {
            self.nodes
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(uid, inbox, mute)| inbox.upgrade().map(|i| (uid.clone(), i, *mute)))
                .collect()
        }
    }

    struct Loopback {
        bus: Arc<Bus>,
        uid: ServerUid,
        mute: bool,
    }

    #[async_trait]
    impl ClusterTransport for Loopback {
        fn publish_request(&self, message: ClusterMessage) {
            for (_, inbox, mute) in self.bus.inboxes() {
                if !mute {
                    inbox.on_request(message.clone());
                }
            }
        }

        fn publish_response(&self, requester: &ServerUid, response: ClusterResponse) {
            for (uid, inbox, _) in self.bus.inboxes() {
                if &uid == requester {
                    inbox.on_response(response.clone());
                }
            }
        }

        async fn server_count(&self) -> Result<usize, AdapterError> {
            if self.bus.count_fails.load(Ordering::SeqCst) {
                return Err(PubSubError::Connection("bus down".into()).into());
            }
            Ok(self.bus.inboxes().len())
        }

        async fn listen(&self, inbox: Weak<dyn ClusterInbox>) -> Result<(), AdapterError> {
            self.bus
                .nodes
                .lock()
                .unwrap()
                .push((self.uid.clone(), inbox, self.mute));
            Ok(())
        }

        async fn close(&self) {}
    }

    async fn node(bus: &Arc<Bus>, tag: &str, mute: bool) -> Arc<FakeDirectory> {
        let bus = Arc::clone(bus);
        let uid = ServerUid::from(tag);
        let dir = FakeDirectory::new(tag, move |nsp, directory| {
            let transport = Loopback {
                bus,
                uid: uid.clone(),
                mute,
            };
            ClusterAdapter::new(
                InMemoryAdapter::new(nsp, directory),
                uid,
                transport,
                Duration::from_millis(100),
            )
        });
        dir.adapter().init().await.unwrap();
        dir
    }

    async fn cluster(bus: &Arc<Bus>) -> (Arc<FakeDirectory>, Arc<FakeDirectory>, Arc<FakeDirectory>) {
        (
            node(bus, "a", false).await,
            node(bus, "b", false).await,
            node(bus, "c", false).await,
        )
    }

    #[tokio::test]
    async fn fetch_sockets_merges_every_node() {
        let bus = Arc::new(Bus::default());
        let (a, b, c) = cluster(&bus).await;
        a.connect("a1");
        a.connect("a2");
        b.connect("b1");
        c.connect("c1");

        assert_eq!(a.adapter().server_count().await, 3);
        let mut ids: Vec<String> = a
            .adapter()
            .fetch_sockets(&BroadcastOptions::new())
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a1", "a2", "b1", "c1"]);
    }

    #[tokio::test]
    async fn fetch_sockets_reports_shortfall_when_a_peer_is_silent() {
        let bus = Arc::new(Bus::default());
        let a = node(&bus, "a", false).await;
        let b = node(&bus, "b", false).await;
        let _silent = node(&bus, "c", true).await;
        a.connect("a1");
        b.connect("b1");

        let err = a
            .adapter()
            .fetch_sockets(&BroadcastOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.expected, 2);
        assert_eq!(err.received(), 1);
        assert_eq!(err.responses.len(), 2);
        assert_eq!(
            err.to_string(),
            "operation has timed out: only 1 responses received out of 2"
        );
    }

    #[tokio::test]
    async fn own_requests_are_not_applied_twice() {
        let bus = Arc::new(Bus::default());
        let (a, _b, _c) = cluster(&bus).await;
        let a1 = a.connect("a1");

        a.adapter()
            .broadcast(Packet::event("/", "hi", vec![]), &BroadcastOptions::new());

        assert_eq!(a1.delivered().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_remote_rooms() {
        let bus = Arc::new(Bus::default());
        let (a, b, c) = cluster(&bus).await;
        let b1 = b.connect("b1");
        let c1 = c.connect("c1");
        b1.join(&[Room::from("news")]);

        a.adapter()
            .broadcast(Packet::event("/", "hi", vec![]), &BroadcastOptions::to_rooms(["news"]));

        assert_eq!(b1.delivered().len(), 1);
        assert!(c1.delivered().is_empty());
    }

    #[tokio::test]
    async fn local_flag_stays_on_this_node() {
        let bus = Arc::new(Bus::default());
        let (a, b, _c) = cluster(&bus).await;
        a.connect("a1");
        b.connect("b1");
        let opts = BroadcastOptions::new().with_flags(BroadcastFlags {
            local: Some(true),
            ..Default::default()
        });

        a.adapter().add_sockets(&opts, &[Room::from("x")]);

        assert!(a.adapter().has_room(&Room::from("x")));
        assert!(!b.adapter().has_room(&Room::from("x")));
    }

    #[tokio::test]
    async fn remote_disconnect_removes_socket() {
        let bus = Arc::new(Bus::default());
        let (a, b, _c) = cluster(&bus).await;
        let b1 = b.connect("b1");

        a.adapter()
            .disconnect_sockets(&BroadcastOptions::to_rooms(["b1"]), true);

        assert!(b1.is_disconnected());
        let remaining = b
            .adapter()
            .fetch_sockets(&BroadcastOptions::to_rooms(["b1"]))
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn broadcast_with_ack_collects_counts_and_acks_from_peers() {
        let bus = Arc::new(Bus::default());
        let (a, b, c) = cluster(&bus).await;
        let a1 = a.connect("a1");
        let b1 = b.connect("b1");
        let b2 = b.connect("b2");
        c.connect("c1");

        let counts = Arc::new(Mutex::new(Vec::new()));
        let acks = Arc::new(AtomicUsize::new(0));
        let counts_seen = Arc::clone(&counts);
        let acks_seen = Arc::clone(&acks);
        a.adapter().broadcast_with_ack(
            Packet::event("/", "ping", vec![]),
            &BroadcastOptions::new(),
            Arc::new(move |n| counts_seen.lock().unwrap().push(n)),
            Arc::new(move |_| {
                acks_seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut counts = counts.lock().unwrap().clone();
        counts.sort();
        assert_eq!(counts, vec![1, 1, 2]);

        for socket in [&a1, &b1, &b2] {
            let id = socket.delivered()[0].id.unwrap();
            socket.ack(id, vec![json!("pong")]);
        }
        assert_eq!(acks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn ack_requests_expire() {
        let bus = Arc::new(Bus::default());
        let adapter = ClusterAdapter::new(
            InMemoryAdapter::new("/", Weak::<FakeDirectory>::new()),
            ServerUid::from("solo"),
            Loopback {
                bus: Arc::clone(&bus),
                uid: ServerUid::from("solo"),
                mute: false,
            },
            Duration::from_millis(20),
        );
        adapter.broadcast_with_ack(
            Packet::event("/", "ping", vec![]),
            &BroadcastOptions::new(),
            Arc::new(|_| {}),
            Arc::new(|_| {}),
        );
        assert_eq!(adapter.pending_requests(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(adapter.pending_requests(), 0);
    }

    #[tokio::test]
    async fn close_cancels_outstanding_requests() {
        let bus = Arc::new(Bus::default());
        let adapter = ClusterAdapter::new(
            InMemoryAdapter::new("/", Weak::<FakeDirectory>::new()),
            ServerUid::from("solo"),
            Loopback {
                bus: Arc::clone(&bus),
                uid: ServerUid::from("solo"),
                mute: false,
            },
            Duration::from_secs(60),
        );
        adapter.broadcast_with_ack(
            Packet::event("/", "ping", vec![]),
            &BroadcastOptions::new(),
            Arc::new(|_| {}),
            Arc::new(|_| {}),
        );
        adapter.close().await;
        assert_eq!(adapter.pending_requests(), 0);
        assert!(adapter.timers.is_empty());
    }

    #[tokio::test]
    async fn server_side_emit_with_ack_gathers_peer_replies() {
        let bus = Arc::new(Bus::default());
        let (a, b, c) = cluster(&bus).await;

        let mut replies = a
            .adapter()
            .server_side_emit_with_ack(vec![json!("hello"), json!(1)], Duration::from_millis(100))
            .await
            .unwrap();
        replies.sort_by_key(|v| v.to_string());

        assert_eq!(replies, vec![json!("b"), json!("c")]);
        assert_eq!(b.server_events(), vec![vec![json!("hello"), json!(1)]]);
        assert_eq!(c.server_events().len(), 1);
        assert!(a.server_events().is_empty());
    }

    #[tokio::test]
    async fn unknown_responses_are_ignored() {
        let bus = Arc::new(Bus::default());
        let adapter = ClusterAdapter::new(
            InMemoryAdapter::new("/", Weak::<FakeDirectory>::new()),
            ServerUid::from("solo"),
            Loopback {
                bus,
                uid: ServerUid::from("solo"),
                mute: false,
            },
            Duration::from_millis(100),
        );

        adapter.on_response(ClusterResponse::FetchSockets {
            request_id: RequestId::from("stale"),
            sockets: vec![],
        });
        adapter.on_response(ClusterResponse::ServerSideEmit {
            request_id: RequestId::from("stale"),
            data: json!("late"),
        });
        adapter.on_response(ClusterResponse::BroadcastAck {
            request_id: RequestId::from("stale"),
            packet: json!([]),
        });
        assert_eq!(adapter.pending_requests(), 0);
    }

    #[tokio::test]
    async fn bus_failure_counts_as_single_node() {
        let bus = Arc::new(Bus::default());
        let (a, _b, _c) = cluster(&bus).await;
        let listener = Arc::new(RecordingListener::default());
        a.adapter().subscribe(listener.clone());

        bus.count_fails.store(true, Ordering::SeqCst);
        assert_eq!(a.adapter().server_count().await, 1);
        assert_eq!(listener.error_count(), 1);
    }
}
