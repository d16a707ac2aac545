//! A client's membership in one namespace.
//!
//! ```text
//! Client ──1:N──► Socket ──► Namespace ──► Adapter
//!                   │
//!                   └── handlers, acks, any-listeners
//! ```
//!
//! Incoming packets arrive from the [`Client`]; outgoing packets either go
//! straight to the client or, with connection state recovery enabled,
//! through the adapter so they are logged for replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::domain::broadcast::{BroadcastOptions, Room};
use crate::domain::foundation::{PrivateId, Shortfall, Sid};
use crate::domain::protocol::{is_reserved_event, DisconnectReason, Packet, PacketType};
use crate::domain::session::{Handshake, Session, SocketDetails};
use crate::ports::{AckCallback, Adapter, LocalSocket};
use crate::sync::{lock, read, write};

use super::client::Client;
use super::error::SocketError;
use super::namespace::Namespace;
use super::operator::BroadcastOperator;

/// Handles one named event: the socket, the event arguments and, when the
/// client asked for one, the acknowledgement responder.
pub type EventHandler = Arc<dyn Fn(Arc<Socket>, Vec<Value>, Option<AckResponder>) + Send + Sync>;

/// Catch-all listener receiving the event name and its arguments.
pub type AnyListener = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

pub type DisconnectHandler = Arc<dyn Fn(Arc<Socket>, DisconnectReason) + Send + Sync>;

/// Handle returned by the any-listener registrations, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Answers one client acknowledgement request. Consumed on use so a request
/// is answered at most once.
pub struct AckResponder {
    socket: Weak<Socket>,
    id: u64,
}

impl AckResponder {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn send(self, args: Vec<Value>) {
        let Some(socket) = self.socket.upgrade() else {
            return;
        };
        if socket.connected() {
            let packet = Packet::ack(socket.nsp.name(), self.id, args);
            socket.client.write_packet(&packet, false);
        }
    }
}

pub struct Socket {
    id: Sid,
    pid: Option<PrivateId>,
    nsp: Arc<Namespace>,
    client: Arc<Client>,
    adapter: Arc<dyn Adapter>,
    handshake: Handshake,
    data: RwLock<Value>,
    connected: AtomicBool,
    recovered: bool,
    acks: Mutex<HashMap<u64, AckCallback>>,
    handlers: RwLock<HashMap<String, EventHandler>>,
    incoming: RwLock<Vec<(ListenerId, AnyListener)>>,
    outgoing: RwLock<Vec<(ListenerId, AnyListener)>>,
    next_listener: AtomicU64,
    disconnecting: RwLock<Vec<DisconnectHandler>>,
    disconnect: RwLock<Vec<DisconnectHandler>>,
    me: Weak<Socket>,
}

impl Socket {
    pub(crate) fn new(
        id: Sid,
        pid: Option<PrivateId>,
        nsp: Arc<Namespace>,
        client: Arc<Client>,
        handshake: Handshake,
        data: Value,
        recovered: bool,
    ) -> Arc<Self> {
        let adapter = nsp.adapter();
        Arc::new_cyclic(|me| Self {
            id,
            pid,
            nsp,
            client,
            adapter,
            handshake,
            data: RwLock::new(data),
            connected: AtomicBool::new(false),
            recovered,
            acks: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            incoming: RwLock::new(Vec::new()),
            outgoing: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            disconnecting: RwLock::new(Vec::new()),
            disconnect: RwLock::new(Vec::new()),
            me: me.clone(),
        })
    }

    pub fn id(&self) -> &Sid {
        &self.id
    }

    /// Private id used to restore the session after a reconnection; set
    /// only when connection state recovery is enabled.
    pub fn pid(&self) -> Option<&PrivateId> {
        self.pid.as_ref()
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.nsp
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether this socket resumed a previous session.
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    pub fn data(&self) -> Value {
        read(&self.data).clone()
    }

    pub fn set_data(&self, data: Value) {
        *write(&self.data) = data;
    }

    /// Rooms of this socket, sorted; always includes its own id room while
    /// connected.
    pub fn rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .adapter
            .socket_rooms(&self.id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn join<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        let rooms: Vec<Room> = rooms.into_iter().map(Into::into).collect();
        self.adapter.add_all(&self.id, &rooms);
    }

    pub fn leave(&self, room: impl Into<Room>) {
        self.adapter.del(&self.id, &room.into());
    }

    // Handlers

    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(Arc<Socket>, Vec<Value>, Option<AckResponder>) + Send + Sync + 'static,
    {
        write(&self.handlers).insert(event.to_string(), Arc::new(handler));
    }

    pub fn on_disconnecting<F>(&self, handler: F)
    where
        F: Fn(Arc<Socket>, DisconnectReason) + Send + Sync + 'static,
    {
        write(&self.disconnecting).push(Arc::new(handler));
    }

    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(Arc<Socket>, DisconnectReason) + Send + Sync + 'static,
    {
        write(&self.disconnect).push(Arc::new(handler));
    }

    pub fn on_any_incoming<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str, &[Value]) + Send + Sync + 'static,
    {
        let id = self.listener_id();
        write(&self.incoming).push((id, Arc::new(listener)));
        id
    }

    pub fn off_any_incoming(&self, id: ListenerId) {
        write(&self.incoming).retain(|(existing, _)| *existing != id);
    }

    pub fn on_any_outgoing<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str, &[Value]) + Send + Sync + 'static,
    {
        let id = self.listener_id();
        write(&self.outgoing).push((id, Arc::new(listener)));
        id
    }

    pub fn off_any_outgoing(&self, id: ListenerId) {
        write(&self.outgoing).retain(|(existing, _)| *existing != id);
    }

    fn listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst))
    }

    // Emission

    /// Sends an event to this client.
    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), SocketError> {
        let packet = self.event_packet(event, args)?;
        if self.nsp.recovery().is_some() {
            // Routed through the adapter so the packet gets an offset.
            let opts = BroadcastOptions::to_rooms([&self.id]);
            self.adapter.broadcast(packet, &opts);
        } else {
            self.notify_outgoing(&packet);
            self.client.write_packet(&packet, false);
        }
        Ok(())
    }

    /// Sends an event that is dropped if the transport is not writable.
    pub fn emit_volatile(&self, event: &str, args: Vec<Value>) -> Result<(), SocketError> {
        let packet = self.event_packet(event, args)?;
        self.notify_outgoing(&packet);
        self.client.write_packet(&packet, true);
        Ok(())
    }

    pub fn send(&self, args: Vec<Value>) -> Result<(), SocketError> {
        self.emit("message", args)
    }

    /// Sends an event and waits for the client's acknowledgement.
    ///
    /// Without an explicit `timeout` the namespace's default ack timeout
    /// applies.
    pub async fn emit_with_ack(
        &self,
        event: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>, SocketError> {
        let packet = self.event_packet(event, args)?;
        if !self.connected() {
            return Err(SocketError::Disconnected);
        }
        let id = self.nsp.next_ack_id();
        let packet = packet.with_id(id);

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.register_ack(
            id,
            Arc::new(move |args| {
                if let Some(tx) = lock(&tx).take() {
                    let _ = tx.send(args);
                }
            }),
        );
        self.notify_outgoing(&packet);
        self.client.write_packet(&packet, false);

        let deadline = timeout.unwrap_or_else(|| self.nsp.ack_timeout());
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(args)) => Ok(args),
            Ok(Err(_)) => Err(SocketError::Disconnected),
            Err(_) => {
                lock(&self.acks).remove(&id);
                Err(SocketError::Timeout(Shortfall::new(1, Vec::new())))
            }
        }
    }

    fn event_packet(&self, event: &str, args: Vec<Value>) -> Result<Packet, SocketError> {
        if is_reserved_event(event) {
            return Err(SocketError::ReservedEvent(event.to_string()));
        }
        Ok(Packet::event(self.nsp.name(), event, args))
    }

    fn register_ack(&self, id: u64, ack: AckCallback) {
        lock(&self.acks).insert(id, ack);
    }

    // Broadcasting to others

    fn operator(&self) -> BroadcastOperator {
        BroadcastOperator::new(
            Arc::clone(&self.adapter),
            self.nsp.name(),
            self.nsp.ack_timeout(),
        )
        .except(&self.id)
    }

    /// Targets every socket of the namespace except this one.
    pub fn broadcast(&self) -> BroadcastOperator {
        self.operator()
    }

    pub fn to(&self, room: impl Into<Room>) -> BroadcastOperator {
        self.operator().to(room)
    }

    pub fn in_room(&self, room: impl Into<Room>) -> BroadcastOperator {
        self.operator().in_room(room)
    }

    pub fn except(&self, room: impl Into<Room>) -> BroadcastOperator {
        self.operator().except(room)
    }

    pub fn local(&self) -> BroadcastOperator {
        self.operator().local()
    }

    pub fn timeout(&self, timeout: Duration) -> BroadcastOperator {
        self.operator().timeout(timeout)
    }

    // Lifecycle

    /// Disconnects from the namespace; `close` also closes the underlying
    /// connection and every other namespace of the client.
    pub fn disconnect(&self, close: bool) {
        if !self.connected() {
            return;
        }
        if close {
            self.client.close();
        } else {
            self.client
                .write_packet(&Packet::disconnect(self.nsp.name()), false);
            self.on_close(DisconnectReason::ServerNamespaceDisconnect);
        }
    }

    /// Joins the default rooms and acknowledges the connection.
    pub(crate) fn on_connect(&self, restored_rooms: &[Room]) {
        self.connected.store(true, Ordering::SeqCst);
        self.join([&self.id]);
        if !restored_rooms.is_empty() {
            self.adapter.add_all(&self.id, restored_rooms);
        }

        let mut body = json!({ "sid": self.id.as_str() });
        if let Some(pid) = &self.pid {
            body["pid"] = Value::String(pid.as_str().to_string());
        }
        self.client
            .write_packet(&Packet::connect(self.nsp.name(), body), false);
        tracing::debug!(sid = %self.id, nsp = %self.nsp.name(), recovered = self.recovered, "socket connected");
    }

    /// Writes a packet missed while the client was away.
    pub(crate) fn replay(&self, packet: &Packet) {
        self.notify_outgoing(packet);
        self.client.write_packet(packet, false);
    }

    pub(crate) fn on_packet(&self, packet: Packet) {
        if !self.connected() {
            return;
        }
        match packet.kind {
            PacketType::Event | PacketType::BinaryEvent => self.on_event(packet),
            PacketType::Ack | PacketType::BinaryAck => self.on_ack(packet),
            PacketType::Disconnect => self.on_close(DisconnectReason::ClientNamespaceDisconnect),
            other => {
                tracing::debug!(sid = %self.id, kind = %other, "unexpected packet for a connected socket")
            }
        }
    }

    fn on_event(&self, packet: Packet) {
        let mut args = packet.args();
        let Some(Value::String(event)) = (!args.is_empty()).then(|| args.remove(0)) else {
            tracing::debug!(sid = %self.id, "event without a name");
            return;
        };
        let Some(me) = self.me.upgrade() else {
            return;
        };

        let listeners: Vec<AnyListener> =
            read(&self.incoming).iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(&event, &args);
        }

        let ack = packet.id.map(|id| AckResponder {
            socket: self.me.clone(),
            id,
        });
        let handler = read(&self.handlers).get(&event).cloned();
        match handler {
            Some(handler) => handler(me, args, ack),
            None => tracing::debug!(sid = %self.id, event = %event, "no handler for event"),
        }
    }

    fn on_ack(&self, packet: Packet) {
        let Some(id) = packet.id else {
            return;
        };
        let callback = lock(&self.acks).remove(&id);
        match callback {
            Some(callback) => callback(packet.args()),
            None => tracing::debug!(sid = %self.id, ack = id, "unknown ack id"),
        }
    }

    fn notify_outgoing(&self, packet: &Packet) {
        let listeners: Vec<AnyListener> =
            read(&self.outgoing).iter().map(|(_, l)| Arc::clone(l)).collect();
        if listeners.is_empty() || packet.kind != PacketType::Event {
            return;
        }
        let mut args = packet.args();
        let event = match args.first() {
            Some(Value::String(name)) => name.clone(),
            _ => return,
        };
        args.remove(0);
        for listener in listeners {
            listener(&event, &args);
        }
    }

    /// Leaves the namespace. Runs at most once.
    pub(crate) fn on_close(&self, reason: DisconnectReason) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };

        let disconnecting: Vec<DisconnectHandler> = read(&self.disconnecting).clone();
        for handler in disconnecting {
            handler(Arc::clone(&me), reason);
        }

        if let (Some(pid), true) = (&self.pid, reason.is_recoverable()) {
            if self.nsp.recovery().is_some() {
                self.adapter.persist_session(Session::new(
                    self.id.clone(),
                    pid.clone(),
                    self.rooms(),
                    self.data(),
                ));
            }
        }

        lock(&self.acks).clear();
        self.adapter.del_all(&self.id);
        self.nsp.remove(&self.id);
        self.client.remove_socket(self.nsp.name());
        tracing::debug!(sid = %self.id, nsp = %self.nsp.name(), reason = %reason, "socket disconnected");

        let disconnect: Vec<DisconnectHandler> = read(&self.disconnect).clone();
        for handler in disconnect {
            handler(Arc::clone(&me), reason);
        }
    }
}

impl LocalSocket for Socket {
    fn id(&self) -> &Sid {
        &self.id
    }

    fn deliver(&self, packet: &Packet, encoded: &str, volatile: bool) {
        self.notify_outgoing(packet);
        self.client.write_encoded(encoded, volatile);
    }

    fn register_ack(&self, id: u64, ack: AckCallback) {
        Socket::register_ack(self, id, ack);
    }

    fn join(&self, rooms: &[Room]) {
        self.adapter.add_all(&self.id, rooms);
    }

    fn leave(&self, room: &Room) {
        self.adapter.del(&self.id, room);
    }

    fn disconnect(&self, close: bool) {
        Socket::disconnect(self, close);
    }

    fn details(&self) -> SocketDetails {
        SocketDetails {
            id: self.id.clone(),
            handshake: self.handshake.clone(),
            rooms: self.rooms(),
            data: self.data(),
        }
    }
}
