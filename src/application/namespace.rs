//! Namespaces - independent channels multiplexed over one connection.
//!
//! A namespace owns its adapter, its connected sockets, the middlewares
//! run before a socket is admitted and the handlers of events emitted by
//! other nodes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use serde_json::Value;

use crate::domain::broadcast::Room;
use crate::domain::foundation::{PrivateId, Shortfall, Sid};
use crate::domain::protocol::{is_reserved_event, Packet};
use crate::domain::session::{RecoveryOptions, RestoredSession, SocketDetails};
use crate::ports::{Adapter, AdapterFactory, LocalSocket, ServerAck, SocketDirectory};
use crate::sync::{read, write};

use super::client::Client;
use super::error::{MiddlewareError, SocketError};
use super::middleware::Middleware;
use super::operator::BroadcastOperator;
use super::remote::RemoteSocket;
use super::socket::Socket;

pub type ConnectionHandler = Arc<dyn Fn(Arc<Socket>) + Send + Sync>;

/// Handles an event emitted by another node; `ack`, when present, sends
/// the reply back to the emitting node.
pub type ServerEventHandler = Arc<dyn Fn(Vec<Value>, Option<ServerAck>) + Send + Sync>;

pub struct Namespace {
    name: String,
    adapter: Arc<dyn Adapter>,
    sockets: RwLock<HashMap<Sid, Arc<Socket>>>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    connection_handlers: RwLock<Vec<ConnectionHandler>>,
    server_event_handlers: RwLock<HashMap<String, ServerEventHandler>>,
    ack_ids: AtomicU64,
    recovery: Option<RecoveryOptions>,
    ack_timeout: Duration,
}

impl Namespace {
    pub(crate) fn new(
        name: &str,
        factory: &AdapterFactory,
        recovery: Option<RecoveryOptions>,
        ack_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Namespace>| {
            let directory: Weak<dyn SocketDirectory> = me.clone();
            Self {
                name: name.to_string(),
                adapter: factory(name, directory),
                sockets: RwLock::new(HashMap::new()),
                middlewares: RwLock::new(Vec::new()),
                connection_handlers: RwLock::new(Vec::new()),
                server_event_handlers: RwLock::new(HashMap::new()),
                ack_ids: AtomicU64::new(0),
                recovery,
                ack_timeout,
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter(&self) -> Arc<dyn Adapter> {
        Arc::clone(&self.adapter)
    }

    pub fn recovery(&self) -> Option<&RecoveryOptions> {
        self.recovery.as_ref()
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub(crate) fn next_ack_id(&self) -> u64 {
        self.ack_ids.fetch_add(1, Ordering::SeqCst)
    }

    /// Sockets of this namespace connected to this node.
    pub fn sockets(&self) -> Vec<Arc<Socket>> {
        read(&self.sockets).values().cloned().collect()
    }

    pub fn socket(&self, id: &Sid) -> Option<Arc<Socket>> {
        read(&self.sockets).get(id).cloned()
    }

    // Registration

    /// Adds a middleware; middlewares run in registration order.
    pub fn use_middleware<M>(&self, middleware: M)
    where
        M: Middleware + 'static,
    {
        write(&self.middlewares).push(Arc::new(middleware));
    }

    pub fn on_connection<F>(&self, handler: F)
    where
        F: Fn(Arc<Socket>) + Send + Sync + 'static,
    {
        write(&self.connection_handlers).push(Arc::new(handler));
    }

    pub fn on_server_event<F>(&self, event: &str, handler: F)
    where
        F: Fn(Vec<Value>, Option<ServerAck>) + Send + Sync + 'static,
    {
        write(&self.server_event_handlers).insert(event.to_string(), Arc::new(handler));
    }

    // Broadcast

    pub fn operator(&self) -> BroadcastOperator {
        BroadcastOperator::new(self.adapter(), self.name.as_str(), self.ack_timeout)
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

    pub fn volatile(&self) -> BroadcastOperator {
        self.operator().volatile()
    }

    pub fn timeout(&self, timeout: Duration) -> BroadcastOperator {
        self.operator().timeout(timeout)
    }

    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), SocketError> {
        self.operator().emit(event, args)
    }

    pub fn send(&self, args: Vec<Value>) -> Result<(), SocketError> {
        self.operator().send(args)
    }

    pub async fn fetch_sockets(&self) -> Result<Vec<RemoteSocket>, Shortfall<SocketDetails>> {
        self.operator().fetch_sockets().await
    }

    pub fn sockets_join<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().sockets_join(rooms);
    }

    pub fn sockets_leave<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().sockets_leave(rooms);
    }

    pub fn disconnect_sockets(&self, close: bool) {
        self.operator().disconnect_sockets(close);
    }

    /// Emits an event to the other nodes of the cluster.
    pub fn server_side_emit(&self, event: &str, args: Vec<Value>) -> Result<(), SocketError> {
        let data = server_event(event, args)?;
        self.adapter.server_side_emit(data);
        Ok(())
    }

    /// Emits to the other nodes and collects one reply per node.
    pub async fn server_side_emit_with_ack(
        &self,
        event: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>, SocketError> {
        let data = server_event(event, args)?;
        self.adapter
            .server_side_emit_with_ack(data, timeout.unwrap_or(self.ack_timeout))
            .await
            .map_err(SocketError::Timeout)
    }

    // Connection flow

    /// Admits a client into this namespace.
    pub(crate) async fn add(self: Arc<Self>, client: Arc<Client>, auth: Value) {
        let restored = self.restore(&auth);

        let mut handshake = client.handshake().clone();
        handshake.auth = auth;

        let socket = match &restored {
            Some(RestoredSession { session, .. }) => Socket::new(
                session.sid.clone(),
                Some(session.pid.clone()),
                Arc::clone(&self),
                Arc::clone(&client),
                handshake,
                session.data.clone(),
                true,
            ),
            None => Socket::new(
                Sid::new(),
                self.recovery.map(|_| PrivateId::new()),
                Arc::clone(&self),
                Arc::clone(&client),
                handshake,
                Value::Null,
                false,
            ),
        };

        let skip_middlewares = restored.is_some()
            && self
                .recovery
                .map(|options| options.skip_middlewares)
                .unwrap_or(false);
        if !skip_middlewares {
            if let Err(err) = self.run_middlewares(&socket).await {
                tracing::debug!(nsp = %self.name, error = %err, "connection refused by middleware");
                client.write_packet(
                    &Packet::connect_error(self.name.as_str(), &err.message, err.data),
                    false,
                );
                return;
            }
        }
        if !client.is_open() {
            tracing::debug!(nsp = %self.name, "client closed during middleware execution");
            return;
        }

        write(&self.sockets).insert(socket.id().clone(), Arc::clone(&socket));
        client.register_socket(&self.name, Arc::clone(&socket));

        match restored {
            Some(RestoredSession {
                session,
                missed_packets,
            }) => {
                socket.on_connect(&session.rooms);
                for packet in &missed_packets {
                    socket.replay(packet);
                }
            }
            None => socket.on_connect(&[]),
        }

        let handlers: Vec<ConnectionHandler> = read(&self.connection_handlers).clone();
        for handler in handlers {
            handler(Arc::clone(&socket));
        }
    }

    fn restore(&self, auth: &Value) -> Option<RestoredSession> {
        self.recovery?;
        let pid = auth.get("pid")?.as_str()?;
        let offset = auth.get("offset")?.as_str()?;
        let restored = self.adapter.restore_session(&PrivateId::from(pid), offset);
        if let Some(restored) = &restored {
            tracing::debug!(
                nsp = %self.name,
                sid = %restored.session.sid,
                missed = restored.missed_packets.len(),
                "session restored"
            );
        }
        restored
    }

    async fn run_middlewares(&self, socket: &Arc<Socket>) -> Result<(), MiddlewareError> {
        let middlewares: Vec<Arc<dyn Middleware>> = read(&self.middlewares).clone();
        for middleware in middlewares {
            middleware.handle(Arc::clone(socket)).await?;
        }
        Ok(())
    }

    pub(crate) fn remove(&self, id: &Sid) {
        write(&self.sockets).remove(id);
    }
}

fn server_event(event: &str, args: Vec<Value>) -> Result<Vec<Value>, SocketError> {
    if is_reserved_event(event) {
        return Err(SocketError::ReservedEvent(event.to_string()));
    }
    let mut data = Vec::with_capacity(args.len() + 1);
    data.push(Value::String(event.to_string()));
    data.extend(args);
    Ok(data)
}

impl SocketDirectory for Namespace {
    fn name(&self) -> &str {
        &self.name
    }

    fn socket(&self, id: &Sid) -> Option<Arc<dyn LocalSocket>> {
        let socket = read(&self.sockets).get(id).cloned()?;
        Some(socket)
    }

    fn next_ack_id(&self) -> u64 {
        Namespace::next_ack_id(self)
    }

    fn on_server_side_emit(&self, mut data: Vec<Value>, ack: Option<ServerAck>) {
        let event = match data.first() {
            Some(Value::String(event)) => event.clone(),
            _ => {
                tracing::warn!(nsp = %self.name, "server-side event without a name");
                return;
            }
        };
        data.remove(0);
        let handler = read(&self.server_event_handlers).get(&event).cloned();
        match handler {
            Some(handler) => handler(data, ack),
            None => tracing::debug!(nsp = %self.name, event = %event, "no handler for server-side event"),
        }
    }
}
