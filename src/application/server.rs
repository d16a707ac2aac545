//! Server - entry point of the socket layer.
//!
//! Owns the engine, the namespaces and one [`Client`] per engine
//! connection. Calls made on the server itself go to the main namespace.
//!
//! ```text
//! EngineServer ──on_connection──► Server ──► Client ──CONNECT──► Namespace
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use axum::Router;
use serde_json::Value;

use crate::adapters::engine::{EngineOptions, EngineServer};
use crate::adapters::http::engine_router;
use crate::adapters::rooms::in_memory_adapter;
use crate::domain::broadcast::Room;
use crate::domain::engine::{CloseReason, ConnectionError, EngineRequest, Frame};
use crate::domain::foundation::{Shortfall, Sid, Timestamp};
use crate::domain::protocol::MAIN_NAMESPACE;
use crate::domain::session::{Handshake, RecoveryOptions, SocketDetails};
use crate::ports::{AdapterError, AdapterFactory, AllowRequest, EngineHandler, EngineSession, ServerAck};
use crate::sync::{read, write};

use super::client::Client;
use super::error::SocketError;
use super::middleware::Middleware;
use super::namespace::Namespace;
use super::operator::BroadcastOperator;
use super::remote::RemoteSocket;
use super::socket::Socket;

#[derive(Clone)]
pub struct ServerOptions {
    /// Path the engine endpoint is mounted on.
    pub path: String,
    pub engine: EngineOptions,
    /// Delay after which a client that joined no namespace is closed.
    pub connect_timeout: Duration,
    /// Default deadline of acknowledgements.
    pub ack_timeout: Duration,
    pub connection_state_recovery: Option<RecoveryOptions>,
    /// Allowed CORS origins; empty or `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// Builds the adapter of each namespace; defaults to the in-memory adapter.
    pub adapter: Option<AdapterFactory>,
    pub allow_request: Option<Arc<dyn AllowRequest>>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            path: "/socket.io/".to_string(),
            engine: EngineOptions::default(),
            connect_timeout: Duration::from_secs(45),
            ack_timeout: Duration::from_secs(5),
            connection_state_recovery: None,
            cors_origins: Vec::new(),
            adapter: None,
            allow_request: None,
        }
    }
}

pub struct Server {
    path: String,
    connect_timeout: Duration,
    ack_timeout: Duration,
    recovery: Option<RecoveryOptions>,
    cors_origins: Vec<String>,
    adapter_factory: AdapterFactory,
    engine: Arc<EngineServer>,
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
    clients: RwLock<HashMap<Sid, Arc<Client>>>,
    main: Arc<Namespace>,
    me: Weak<Server>,
}

impl Server {
    /// Creates the server and its main namespace.
    pub async fn new(options: ServerOptions) -> Result<Arc<Self>, AdapterError> {
        let ServerOptions {
            path,
            engine,
            connect_timeout,
            ack_timeout,
            connection_state_recovery: recovery,
            cors_origins,
            adapter,
            allow_request,
        } = options;
        let adapter_factory = adapter.unwrap_or_else(|| in_memory_adapter(recovery));

        let server = Arc::new_cyclic(|me: &Weak<Server>| {
            let handler: Weak<dyn EngineHandler> = me.clone();
            let main = Namespace::new(MAIN_NAMESPACE, &adapter_factory, recovery, ack_timeout);
            let mut namespaces = HashMap::new();
            namespaces.insert(MAIN_NAMESPACE.to_string(), Arc::clone(&main));
            Self {
                path,
                connect_timeout,
                ack_timeout,
                recovery,
                cors_origins,
                engine: EngineServer::new(engine, handler, allow_request),
                adapter_factory,
                namespaces: RwLock::new(namespaces),
                clients: RwLock::new(HashMap::new()),
                main,
                me: me.clone(),
            }
        });
        server.main.adapter().init().await?;
        Ok(server)
    }

    pub fn engine(&self) -> &Arc<EngineServer> {
        &self.engine
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// axum router serving the engine endpoint on the configured path.
    pub fn router(&self) -> Router {
        engine_router(Arc::clone(&self.engine), &self.path, &self.cors_origins)
    }

    /// Returns the namespace `name`, creating it on first use. A leading
    /// `/` is added when missing.
    pub async fn of(&self, name: &str) -> Result<Arc<Namespace>, AdapterError> {
        let name = if name.starts_with('/') {
            name.to_string()
        } else {
            format!("/{}", name)
        };
        if let Some(existing) = self.namespace(&name) {
            return Ok(existing);
        }

        let namespace = {
            let mut namespaces = write(&self.namespaces);
            if let Some(existing) = namespaces.get(&name) {
                return Ok(Arc::clone(existing));
            }
            let namespace =
                Namespace::new(&name, &self.adapter_factory, self.recovery, self.ack_timeout);
            namespaces.insert(name.clone(), Arc::clone(&namespace));
            namespace
        };
        tracing::debug!(nsp = %name, "namespace created");
        namespace.adapter().init().await?;
        Ok(namespace)
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        read(&self.namespaces).get(name).cloned()
    }

    pub fn main(&self) -> &Arc<Namespace> {
        &self.main
    }

    pub fn clients_count(&self) -> usize {
        read(&self.clients).len()
    }

    /// Closes every connection then every adapter.
    pub async fn close(&self) {
        self.engine.close();
        let namespaces: Vec<Arc<Namespace>> = read(&self.namespaces).values().cloned().collect();
        for namespace in namespaces {
            namespace.adapter().close().await;
        }
        tracing::info!("server closed");
    }

    // Main namespace

    pub fn use_middleware<M>(&self, middleware: M)
    where
        M: Middleware + 'static,
    {
        self.main.use_middleware(middleware);
    }

    pub fn on_connection<F>(&self, handler: F)
    where
        F: Fn(Arc<Socket>) + Send + Sync + 'static,
    {
        self.main.on_connection(handler);
    }

    pub fn on_server_event<F>(&self, event: &str, handler: F)
    where
        F: Fn(Vec<Value>, Option<ServerAck>) + Send + Sync + 'static,
    {
        self.main.on_server_event(event, handler);
    }

    pub fn to(&self, room: impl Into<Room>) -> BroadcastOperator {
        self.main.to(room)
    }

    pub fn in_room(&self, room: impl Into<Room>) -> BroadcastOperator {
        self.main.in_room(room)
    }

    pub fn except(&self, room: impl Into<Room>) -> BroadcastOperator {
        self.main.except(room)
    }

    pub fn local(&self) -> BroadcastOperator {
        self.main.local()
    }

    pub fn volatile(&self) -> BroadcastOperator {
        self.main.volatile()
    }

    pub fn timeout(&self, timeout: Duration) -> BroadcastOperator {
        self.main.timeout(timeout)
    }

    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), SocketError> {
        self.main.emit(event, args)
    }

    pub fn send(&self, args: Vec<Value>) -> Result<(), SocketError> {
        self.main.send(args)
    }

    pub async fn fetch_sockets(&self) -> Result<Vec<RemoteSocket>, Shortfall<SocketDetails>> {
        self.main.fetch_sockets().await
    }

    pub fn sockets_join<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.main.sockets_join(rooms);
    }

    pub fn sockets_leave<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.main.sockets_leave(rooms);
    }

    pub fn disconnect_sockets(&self, close: bool) {
        self.main.disconnect_sockets(close);
    }

    pub fn server_side_emit(&self, event: &str, args: Vec<Value>) -> Result<(), SocketError> {
        self.main.server_side_emit(event, args)
    }

    pub async fn server_side_emit_with_ack(
        &self,
        event: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>, SocketError> {
        self.main.server_side_emit_with_ack(event, args, timeout).await
    }

    fn client(&self, sid: &Sid) -> Option<Arc<Client>> {
        read(&self.clients).get(sid).cloned()
    }
}

fn handshake_of(request: &EngineRequest) -> Handshake {
    let now = Timestamp::now();
    Handshake {
        headers: request.headers.clone(),
        time: now.to_rfc3339(),
        address: request.remote_addr.clone().unwrap_or_default(),
        xdomain: request.header("origin").is_some(),
        secure: request
            .header("x-forwarded-proto")
            .map(|proto| proto == "https")
            .unwrap_or(false),
        issued: now.as_unix_millis(),
        url: request.url.clone(),
        query: request.query.clone(),
        auth: Value::Null,
    }
}

impl EngineHandler for Server {
    fn on_connection(&self, session: Arc<dyn EngineSession>, request: &EngineRequest) {
        let sid = session.sid().clone();
        let client = Client::new(session, handshake_of(request), self.me.clone());
        client.start_connect_timer(self.connect_timeout);
        write(&self.clients).insert(sid, client);
    }

    fn on_message(&self, sid: &Sid, frame: Frame) {
        match self.client(sid) {
            Some(client) => client.on_frame(frame),
            None => tracing::debug!(sid = %sid, "message for unknown client"),
        }
    }

    fn on_close(&self, sid: &Sid, reason: CloseReason) {
        let client = write(&self.clients).remove(sid);
        if let Some(client) = client {
            client.on_close(reason);
        }
    }

    fn on_connection_error(&self, error: &ConnectionError) {
        tracing::debug!(code = error.code.code(), message = %error.message, "connection refused");
    }
}
