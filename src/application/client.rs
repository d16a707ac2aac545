//! One engine connection multiplexed into namespace sockets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::domain::engine::{CloseReason, Frame, ReadyState};
use crate::domain::foundation::Sid;
use crate::domain::protocol::{DisconnectReason, Packet, PacketType};
use crate::domain::session::Handshake;
use crate::ports::EngineSession;
use crate::sync::{lock, read, write};

use super::server::Server;
use super::socket::Socket;

pub struct Client {
    conn: Arc<dyn EngineSession>,
    handshake: Handshake,
    server: Weak<Server>,
    sockets: RwLock<HashMap<String, Arc<Socket>>>,
    connect_timer: Mutex<Option<JoinHandle<()>>>,
    me: Weak<Client>,
}

impl Client {
    pub(crate) fn new(
        conn: Arc<dyn EngineSession>,
        handshake: Handshake,
        server: Weak<Server>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            conn,
            handshake,
            server,
            sockets: RwLock::new(HashMap::new()),
            connect_timer: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn sid(&self) -> &Sid {
        self.conn.sid()
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn is_open(&self) -> bool {
        self.conn.ready_state() == ReadyState::Open
    }

    pub fn socket(&self, nsp: &str) -> Option<Arc<Socket>> {
        read(&self.sockets).get(nsp).cloned()
    }

    /// Closes the connection if no namespace is joined within `timeout`.
    pub(crate) fn start_connect_timer(&self, timeout: Duration) {
        let me = self.me.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(client) = me.upgrade() {
                if read(&client.sockets).is_empty() {
                    tracing::info!(sid = %client.sid(), "no namespace joined before the connect timeout");
                    client.close();
                }
            }
        });
        if let Some(previous) = lock(&self.connect_timer).replace(timer) {
            previous.abort();
        }
    }

    pub(crate) fn on_frame(&self, frame: Frame) {
        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(_) => {
                tracing::warn!(sid = %self.sid(), "binary attachments are not supported");
                self.close();
                return;
            }
        };
        let packet = match Packet::decode(&text) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(sid = %self.sid(), error = %e, "invalid packet");
                self.close();
                return;
            }
        };
        tracing::debug!(sid = %self.sid(), nsp = %packet.nsp, kind = %packet.kind, "packet received");

        if packet.kind == PacketType::Connect {
            self.connect(packet.nsp, packet.data);
            return;
        }
        match self.socket(&packet.nsp) {
            Some(socket) => socket.on_packet(packet),
            None => tracing::debug!(sid = %self.sid(), nsp = %packet.nsp, "no socket for namespace"),
        }
    }

    fn connect(&self, nsp: String, auth: Option<Value>) {
        let (Some(server), Some(me)) = (self.server.upgrade(), self.me.upgrade()) else {
            return;
        };
        if self.socket(&nsp).is_some() {
            tracing::debug!(sid = %self.sid(), nsp = %nsp, "namespace already joined");
            return;
        }
        let Some(namespace) = server.namespace(&nsp) else {
            self.write_packet(&Packet::connect_error(nsp, "Invalid namespace", None), false);
            return;
        };
        let auth = auth.unwrap_or_else(|| json!({}));
        tokio::spawn(async move {
            namespace.add(me, auth).await;
        });
    }

    pub(crate) fn register_socket(&self, nsp: &str, socket: Arc<Socket>) {
        if let Some(timer) = lock(&self.connect_timer).take() {
            timer.abort();
        }
        write(&self.sockets).insert(nsp.to_string(), socket);
    }

    pub(crate) fn remove_socket(&self, nsp: &str) {
        write(&self.sockets).remove(nsp);
    }

    pub(crate) fn write_packet(&self, packet: &Packet, volatile: bool) {
        self.write_encoded(&packet.encode(), volatile);
    }

    pub(crate) fn write_encoded(&self, encoded: &str, volatile: bool) {
        self.conn.send(Frame::Text(encoded.to_string()), volatile);
    }

    /// Closes the engine connection; every socket follows.
    pub fn close(&self) {
        self.conn.close();
    }

    /// Engine connection closed.
    pub(crate) fn on_close(&self, reason: CloseReason) {
        if let Some(timer) = lock(&self.connect_timer).take() {
            timer.abort();
        }
        let sockets: Vec<Arc<Socket>> = write(&self.sockets).drain().map(|(_, s)| s).collect();
        for socket in sockets {
            socket.on_close(DisconnectReason::Transport(reason));
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.connect_timer).take() {
            timer.abort();
        }
    }
}
