//! One engine connection: heartbeat, buffered writes and transport upgrade.
//!
//! ```text
//! opening ──► open ──► closed
//!               │
//!               └── upgrade: candidate websocket ── 2probe/3probe ── 5 ──► active
//! ```
//!
//! All mutable state sits behind one mutex; the connection observer is
//! always called after the lock is released.

use std::mem;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use crate::domain::engine::{
    CloseReason, EngineErrorCode, EnginePacket, Frame, OpenPacket, ReadyState, TransportKind,
    RECORD_SEPARATOR,
};
use crate::domain::foundation::{Sid, StateMachine};
use crate::ports::{EngineHandler, EngineSession};
use crate::sync::lock;

use super::server::{EngineOptions, EngineResponse, EngineServer};
use super::transport::{next_transport_id, Transport, WsCommand};

struct Candidate {
    id: u64,
    tx: mpsc::UnboundedSender<WsCommand>,
}

struct ConnectionState {
    ready_state: ReadyState,
    transport: Transport,
    candidate: Option<Candidate>,
    write_buffer: Vec<EnginePacket>,
    /// Probe answered, waiting for the upgrade packet.
    upgrading: bool,
    /// A probe arrived while no GET was parked; the next one gets a `noop`.
    noop_owed: bool,
    heartbeat: Option<JoinHandle<()>>,
    upgrade_timer: Option<JoinHandle<()>>,
}

impl ConnectionState {
    fn flush(&mut self) {
        if self.ready_state == ReadyState::Closed
            || self.upgrading
            || self.write_buffer.is_empty()
            || !self.transport.is_writable()
        {
            return;
        }
        let packets = mem::take(&mut self.write_buffer);
        self.transport.send(packets);
    }

    fn drop_candidate(&mut self) {
        if let Some(candidate) = self.candidate.take() {
            let _ = candidate.tx.send(WsCommand::Close);
        }
        if let Some(timer) = self.upgrade_timer.take() {
            timer.abort();
        }
        self.upgrading = false;
    }
}

/// Which transport of the connection an event came from.
enum Origin {
    Active,
    Candidate,
    Stale,
}

pub struct Connection {
    sid: Sid,
    options: Arc<EngineOptions>,
    state: Mutex<ConnectionState>,
    pong: Notify,
    handler: Weak<dyn EngineHandler>,
    server: Weak<EngineServer>,
    me: Weak<Connection>,
}

impl Connection {
    pub(crate) fn new(
        sid: Sid,
        transport: Transport,
        options: Arc<EngineOptions>,
        handler: Weak<dyn EngineHandler>,
        server: Weak<EngineServer>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            sid,
            options,
            state: Mutex::new(ConnectionState {
                ready_state: ReadyState::Opening,
                transport,
                candidate: None,
                write_buffer: Vec::new(),
                upgrading: false,
                noop_owed: false,
                heartbeat: None,
                upgrade_timer: None,
            }),
            pong: Notify::new(),
            handler,
            server,
            me: me.clone(),
        })
    }

    /// Queues the handshake packet and starts the heartbeat.
    pub(crate) fn open(&self) {
        let mut state = lock(&self.state);
        let Ok(next) = state.ready_state.transition_to(ReadyState::Open) else {
            return;
        };
        state.ready_state = next;

        let upgrades = match state.transport.kind() {
            TransportKind::Polling if self.options.allows(TransportKind::Websocket) => {
                vec![TransportKind::Websocket.as_str().to_string()]
            }
            _ => Vec::new(),
        };
        let open = OpenPacket {
            sid: self.sid.to_string(),
            upgrades,
            ping_interval: self.options.ping_interval.as_millis() as u64,
            ping_timeout: self.options.ping_timeout.as_millis() as u64,
            max_payload: self.options.max_http_buffer_size,
        };
        let data = serde_json::to_string(&open).unwrap_or_default();
        state.write_buffer.insert(0, EnginePacket::Open(data));
        state.heartbeat = Some(self.start_heartbeat());
        state.flush();
    }

    fn start_heartbeat(&self) -> JoinHandle<()> {
        let me = self.me.clone();
        let interval = self.options.ping_interval;
        let timeout = self.options.ping_timeout;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(connection) = me.upgrade() else {
                    return;
                };
                let pong = connection.pong.notified();
                connection.send_packet(EnginePacket::Ping(None));
                if tokio::time::timeout(timeout, pong).await.is_err() {
                    connection.close_with(CloseReason::PingTimeout);
                    return;
                }
            }
        })
    }

    fn send_packet(&self, packet: EnginePacket) {
        let mut state = lock(&self.state);
        if matches!(state.ready_state, ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        state.write_buffer.push(packet);
        state.flush();
    }

    /// Number of packets waiting for a writable transport.
    pub fn buffered(&self) -> usize {
        lock(&self.state).write_buffer.len()
    }

    pub fn is_upgrading(&self) -> bool {
        let state = lock(&self.state);
        state.candidate.is_some() || state.upgrading
    }

    /// Answers a polling GET once data is available.
    pub(crate) async fn poll(&self) -> EngineResponse {
        let rx = {
            let mut state = lock(&self.state);
            if state.ready_state == ReadyState::Closed {
                return EngineResponse::text(EnginePacket::Close.encode_text());
            }
            if state.transport.has_pending_poll() {
                drop(state);
                tracing::debug!(sid = %self.sid, "overlapping poll");
                self.close_with(CloseReason::TransportError);
                return EngineResponse::rejection(EngineErrorCode::BadRequest);
            }
            if state.noop_owed {
                state.noop_owed = false;
                return EngineResponse::text(EnginePacket::Noop.encode_text());
            }
            let (tx, rx) = oneshot::channel();
            state.transport.park(tx);
            state.flush();
            rx
        };

        match rx.await {
            Ok(payload) => EngineResponse::text(payload),
            Err(_) => EngineResponse::text(EnginePacket::Close.encode_text()),
        }
    }

    /// Handles a polling POST body.
    pub(crate) fn receive_payload(&self, body: &[u8]) -> EngineResponse {
        if body.len() > self.options.max_http_buffer_size {
            tracing::debug!(sid = %self.sid, size = body.len(), "payload too large");
            self.close_with(CloseReason::TransportError);
            return EngineResponse::status(413);
        }

        let Ok(text) = std::str::from_utf8(body) else {
            self.close_with(CloseReason::ParseError);
            return EngineResponse::text("ok");
        };
        for raw in text.split(RECORD_SEPARATOR) {
            match EnginePacket::decode_text(raw) {
                Ok(EnginePacket::Close) => {
                    self.close_with(CloseReason::TransportClose);
                    break;
                }
                Ok(packet) => self.on_packet(packet),
                Err(e) => {
                    tracing::debug!(sid = %self.sid, error = %e, "undecodable payload");
                    self.close_with(CloseReason::ParseError);
                    break;
                }
            }
        }
        EngineResponse::text("ok")
    }

    fn on_packet(&self, packet: EnginePacket) {
        if self.ready_state() != ReadyState::Open {
            tracing::debug!(sid = %self.sid, "packet received with closed connection");
            return;
        }
        match packet {
            EnginePacket::Pong(_) => self.pong.notify_one(),
            EnginePacket::Message(frame) => {
                if let Some(handler) = self.handler.upgrade() {
                    handler.on_message(&self.sid, frame);
                }
            }
            EnginePacket::Close => self.close_with(CloseReason::TransportClose),
            other => tracing::debug!(sid = %self.sid, packet = ?other, "ignored packet"),
        }
    }

    /// Registers a websocket that will take over once it passes the probe.
    pub(crate) fn start_upgrade(
        &self,
    ) -> Result<(u64, mpsc::UnboundedReceiver<WsCommand>), EngineErrorCode> {
        let mut state = lock(&self.state);
        if state.ready_state != ReadyState::Open
            || state.transport.kind() == TransportKind::Websocket
            || state.candidate.is_some()
        {
            return Err(EngineErrorCode::BadRequest);
        }

        let id = next_transport_id();
        let (tx, rx) = mpsc::unbounded_channel();
        state.candidate = Some(Candidate { id, tx });

        let me = self.me.clone();
        let delay = self.options.upgrade_timeout;
        state.upgrade_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(connection) = me.upgrade() {
                tracing::debug!(sid = %connection.sid, "upgrade timed out");
                connection.cancel_upgrade(id);
            }
        }));
        Ok((id, rx))
    }

    fn cancel_upgrade(&self, id: u64) {
        let mut state = lock(&self.state);
        if state.candidate.as_ref().map(|c| c.id) == Some(id) {
            state.drop_candidate();
            state.flush();
        }
    }

    fn origin(&self, transport_id: u64) -> Origin {
        let state = lock(&self.state);
        if state.transport.websocket_id() == Some(transport_id) {
            Origin::Active
        } else if state.candidate.as_ref().map(|c| c.id) == Some(transport_id) {
            Origin::Candidate
        } else {
            Origin::Stale
        }
    }

    /// Handles a frame read from one of this connection's websockets.
    pub(crate) fn on_websocket_frame(&self, transport_id: u64, frame: Frame) {
        let origin = self.origin(transport_id);
        if frame.len() > self.options.max_http_buffer_size {
            tracing::debug!(sid = %self.sid, size = frame.len(), "payload too large");
            match origin {
                Origin::Active => self.close_with(CloseReason::TransportError),
                Origin::Candidate => self.cancel_upgrade(transport_id),
                Origin::Stale => {}
            }
            return;
        }

        let packet = match EnginePacket::decode_frame(frame) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(sid = %self.sid, error = %e, "undecodable frame");
                match origin {
                    Origin::Active => self.close_with(CloseReason::ParseError),
                    Origin::Candidate => self.cancel_upgrade(transport_id),
                    Origin::Stale => {}
                }
                return;
            }
        };

        match origin {
            Origin::Active => self.on_packet(packet),
            Origin::Candidate => self.on_probe_packet(transport_id, packet),
            Origin::Stale => tracing::debug!(sid = %self.sid, "frame from discarded transport"),
        }
    }

    fn on_probe_packet(&self, transport_id: u64, packet: EnginePacket) {
        let mut state = lock(&self.state);
        match packet {
            EnginePacket::Ping(Some(data)) if data == "probe" => {
                if let Some(candidate) = &state.candidate {
                    let pong = EnginePacket::Pong(Some(data)).encode_frame();
                    let _ = candidate.tx.send(WsCommand::Send(pong));
                }
                state.upgrading = true;
                if !state.transport.discard() {
                    state.noop_owed = true;
                }
            }
            EnginePacket::Upgrade if state.upgrading => {
                let Some(candidate) = state.candidate.take() else {
                    return;
                };
                if let Some(timer) = state.upgrade_timer.take() {
                    timer.abort();
                }
                let mut previous = mem::replace(
                    &mut state.transport,
                    Transport::websocket(candidate.id, candidate.tx),
                );
                previous.discard();
                state.upgrading = false;
                state.noop_owed = false;
                state.flush();
                tracing::debug!(sid = %self.sid, "upgraded to websocket");
            }
            other => {
                tracing::debug!(sid = %self.sid, packet = ?other, "invalid upgrade packet");
                if state.candidate.as_ref().map(|c| c.id) == Some(transport_id) {
                    state.drop_candidate();
                    state.flush();
                }
            }
        }
    }

    /// Handles the end of one of this connection's websockets.
    pub(crate) fn on_websocket_closed(&self, transport_id: u64) {
        match self.origin(transport_id) {
            Origin::Active => self.close_with(CloseReason::TransportClose),
            Origin::Candidate => self.cancel_upgrade(transport_id),
            Origin::Stale => {}
        }
    }

    /// Tears the connection down and notifies the observer once.
    pub(crate) fn close_with(&self, reason: CloseReason) {
        {
            let mut state = lock(&self.state);
            if state.ready_state == ReadyState::Closed {
                return;
            }
            state.ready_state = ReadyState::Closed;
            if let Some(heartbeat) = state.heartbeat.take() {
                heartbeat.abort();
            }
            state.drop_candidate();
            let remaining = mem::take(&mut state.write_buffer);
            state.transport.close(remaining);
        }

        if let Some(server) = self.server.upgrade() {
            server.remove(&self.sid);
        }
        tracing::info!(sid = %self.sid, reason = %reason, "connection closed");
        if let Some(handler) = self.handler.upgrade() {
            handler.on_close(&self.sid, reason);
        }
    }
}

impl EngineSession for Connection {
    fn sid(&self) -> &Sid {
        &self.sid
    }

    fn send(&self, frame: Frame, volatile: bool) {
        if volatile {
            let state = lock(&self.state);
            if state.upgrading || !state.transport.is_writable() {
                tracing::debug!(sid = %self.sid, "transport not writable, volatile packet dropped");
                return;
            }
        }
        self.send_packet(EnginePacket::Message(frame));
    }

    fn close(&self) {
        self.close_with(CloseReason::ForcedClose);
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.state).ready_state
    }

    fn transport(&self) -> TransportKind {
        lock(&self.state).transport.kind()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let state = lock(&self.state);
        if let Some(heartbeat) = &state.heartbeat {
            heartbeat.abort();
        }
        if let Some(timer) = &state.upgrade_timer {
            timer.abort();
        }
    }
}
