//! Engine request dispatcher and connection table.
//!
//! Every request is verified before it touches a connection:
//!
//! 1. the transport must be known and allowed
//! 2. a given session id must be known (and match the transport in use)
//! 3. otherwise the handshake must be a GET for protocol revision 4
//! 4. the admission hook runs last
//!
//! Rejections are reported to the connection observer and answered with
//! `{code, message}`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use http::Method;
use tokio::sync::mpsc;

use crate::domain::engine::{
    ConnectionError, EngineErrorCode, EngineRequest, Frame, TransportKind,
};
use crate::domain::foundation::Sid;
use crate::ports::{AllowRequest, EngineHandler, EngineSession};
use crate::sync::{read, write};

use super::connection::Connection;
use super::transport::{next_transport_id, Transport, WsCommand};

/// Only protocol revision accepted at handshake.
pub const PROTOCOL_REVISION: &str = "4";

/// Tunables of the engine layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub upgrade_timeout: Duration,
    /// Largest accepted message, in bytes (or characters for text frames).
    pub max_http_buffer_size: usize,
    pub transports: Vec<TransportKind>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(25_000),
            ping_timeout: Duration::from_millis(20_000),
            upgrade_timeout: Duration::from_millis(10_000),
            max_http_buffer_size: 1_000_000,
            transports: vec![TransportKind::Polling, TransportKind::Websocket],
        }
    }
}

impl EngineOptions {
    pub fn allows(&self, kind: TransportKind) -> bool {
        self.transports.contains(&kind)
    }
}

/// Transport-neutral HTTP answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl EngineResponse {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; charset=UTF-8",
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=UTF-8",
            body: String::new(),
        }
    }

    pub fn error(error: &ConnectionError) -> Self {
        Self {
            status: error.code.status(),
            content_type: "application/json",
            body: serde_json::to_string(&error.body()).unwrap_or_default(),
        }
    }

    pub(crate) fn rejection(code: EngineErrorCode) -> Self {
        Self::error(&ConnectionError::new(code))
    }
}

/// A websocket handed to the engine; the HTTP layer pumps frames through it.
pub struct WebSocketLink {
    connection: Arc<Connection>,
    transport_id: u64,
    outbound: Option<mpsc::UnboundedReceiver<WsCommand>>,
}

impl WebSocketLink {
    pub fn sid(&self) -> &Sid {
        self.connection.sid()
    }

    /// Commands to write to the socket; can be taken once.
    pub fn take_outbound(&mut self) -> Option<mpsc::UnboundedReceiver<WsCommand>> {
        self.outbound.take()
    }

    pub fn on_frame(&self, frame: Frame) {
        self.connection.on_websocket_frame(self.transport_id, frame);
    }

    pub fn on_close(&self) {
        self.connection.on_websocket_closed(self.transport_id);
    }
}

pub struct EngineServer {
    options: Arc<EngineOptions>,
    handler: Weak<dyn EngineHandler>,
    allow_request: Option<Arc<dyn AllowRequest>>,
    clients: RwLock<HashMap<Sid, Arc<Connection>>>,
    me: Weak<EngineServer>,
}

impl EngineServer {
    pub fn new(
        options: EngineOptions,
        handler: Weak<dyn EngineHandler>,
        allow_request: Option<Arc<dyn AllowRequest>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            options: Arc::new(options),
            handler,
            allow_request,
            clients: RwLock::new(HashMap::new()),
            me: me.clone(),
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn client(&self, sid: &Sid) -> Option<Arc<Connection>> {
        read(&self.clients).get(sid).cloned()
    }

    pub fn clients_count(&self) -> usize {
        read(&self.clients).len()
    }

    pub(crate) fn remove(&self, sid: &Sid) {
        write(&self.clients).remove(sid);
    }

    /// Runs protocol checks then the admission hook.
    pub async fn verify(&self, request: &EngineRequest) -> Result<(), ConnectionError> {
        let result = match self.check_protocol(request) {
            Ok(()) => self.check_admission(request).await,
            Err(e) => Err(e),
        };
        if let Err(error) = &result {
            tracing::debug!(
                code = error.code.code(),
                message = %error.message,
                "engine request rejected"
            );
            if let Some(handler) = self.handler.upgrade() {
                handler.on_connection_error(error);
            }
        }
        result
    }

    fn check_protocol(&self, request: &EngineRequest) -> Result<(), ConnectionError> {
        let name = request.transport();
        let kind = TransportKind::parse(name)
            .filter(|kind| self.options.allows(*kind))
            .ok_or_else(|| {
                ConnectionError::new(EngineErrorCode::UnknownTransport)
                    .with_context("transport", name)
            })?;

        if let Some(sid) = request.sid() {
            let connection = self.client(&Sid::from(sid)).ok_or_else(|| {
                ConnectionError::new(EngineErrorCode::UnknownSid).with_context("sid", sid)
            })?;
            let previous = connection.transport();
            if kind == TransportKind::Polling && previous != TransportKind::Polling {
                return Err(ConnectionError::new(EngineErrorCode::BadRequest)
                    .with_context("name", "TRANSPORT_MISMATCH")
                    .with_context("transport", name)
                    .with_context("previousTransport", previous.as_str()));
            }
        } else {
            if request.method != Method::GET {
                return Err(ConnectionError::new(EngineErrorCode::BadHandshakeMethod)
                    .with_context("method", request.method.as_str()));
            }
            if request.protocol() != Some(PROTOCOL_REVISION) {
                return Err(ConnectionError::new(EngineErrorCode::UnsupportedProtocolVersion)
                    .with_context("protocol", request.protocol().unwrap_or_default()));
            }
        }

        if kind == TransportKind::Websocket && !request.upgrade {
            return Err(ConnectionError::new(EngineErrorCode::BadRequest)
                .with_context("name", "TRANSPORT_HANDSHAKE_ERROR"));
        }
        Ok(())
    }

    async fn check_admission(&self, request: &EngineRequest) -> Result<(), ConnectionError> {
        let Some(hook) = &self.allow_request else {
            return Ok(());
        };
        hook.allow(request).await.map_err(|reason| {
            ConnectionError::new(EngineErrorCode::Forbidden).with_context("message", reason)
        })
    }

    /// Answers a long-polling request (handshake, GET or POST).
    pub async fn handle_request(&self, request: EngineRequest) -> EngineResponse {
        if let Err(error) = self.verify(&request).await {
            return EngineResponse::error(&error);
        }

        let Some(sid) = request.sid() else {
            let connection = self.handshake(Transport::polling(), &request);
            return connection.poll().await;
        };
        let Some(connection) = self.client(&Sid::from(sid)) else {
            return EngineResponse::rejection(EngineErrorCode::UnknownSid);
        };
        match request.method {
            Method::GET => connection.poll().await,
            Method::POST => connection.receive_payload(&request.body),
            _ => EngineResponse::rejection(EngineErrorCode::BadRequest),
        }
    }

    /// Attaches an upgraded websocket: a new session, or an upgrade candidate
    /// for an existing polling session.
    pub async fn handle_upgrade(
        &self,
        request: &EngineRequest,
    ) -> Result<WebSocketLink, EngineResponse> {
        if let Err(error) = self.verify(request).await {
            return Err(EngineResponse::error(&error));
        }

        match request.sid() {
            Some(sid) => {
                let connection = self
                    .client(&Sid::from(sid))
                    .ok_or_else(|| EngineResponse::rejection(EngineErrorCode::UnknownSid))?;
                let (transport_id, outbound) = connection
                    .start_upgrade()
                    .map_err(EngineResponse::rejection)?;
                tracing::debug!(sid = %sid, "upgrade requested");
                Ok(WebSocketLink {
                    connection,
                    transport_id,
                    outbound: Some(outbound),
                })
            }
            None => {
                let transport_id = next_transport_id();
                let (tx, outbound) = mpsc::unbounded_channel();
                let connection =
                    self.handshake(Transport::websocket(transport_id, tx), request);
                Ok(WebSocketLink {
                    connection,
                    transport_id,
                    outbound: Some(outbound),
                })
            }
        }
    }

    fn handshake(&self, transport: Transport, request: &EngineRequest) -> Arc<Connection> {
        let sid = Sid::new();
        let kind = transport.kind();
        let connection = Connection::new(
            sid.clone(),
            transport,
            Arc::clone(&self.options),
            self.handler.clone(),
            self.me.clone(),
        );
        write(&self.clients).insert(sid.clone(), Arc::clone(&connection));
        connection.open();
        tracing::info!(sid = %sid, transport = %kind, "connection opened");

        if let Some(handler) = self.handler.upgrade() {
            let session: Arc<dyn EngineSession> = connection.clone();
            handler.on_connection(session, request);
        }
        connection
    }

    /// Closes every connection.
    pub fn close(&self) {
        let connections: Vec<Arc<Connection>> = read(&self.clients).values().cloned().collect();
        tracing::debug!(count = connections.len(), "closing all open clients");
        for connection in connections {
            connection.close();
        }
    }
}
