//! A socket returned by `fetch_sockets`, possibly attached to another node.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::domain::broadcast::Room;
use crate::domain::foundation::Sid;
use crate::domain::session::{Handshake, SocketDetails};
use crate::ports::Adapter;

use super::error::SocketError;
use super::operator::BroadcastOperator;

/// Snapshot of a socket plus the operations that can reach it anywhere in
/// the cluster. Every operation targets the socket's own room.
#[derive(Clone)]
pub struct RemoteSocket {
    adapter: Arc<dyn Adapter>,
    nsp: String,
    details: SocketDetails,
    default_timeout: Duration,
}

impl RemoteSocket {
    pub(crate) fn new(
        adapter: Arc<dyn Adapter>,
        nsp: String,
        details: SocketDetails,
        default_timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            nsp,
            details,
            default_timeout,
        }
    }

    pub fn id(&self) -> &Sid {
        &self.details.id
    }

    pub fn handshake(&self) -> &Handshake {
        &self.details.handshake
    }

    pub fn rooms(&self) -> &[Room] {
        &self.details.rooms
    }

    pub fn data(&self) -> &Value {
        &self.details.data
    }

    fn operator(&self) -> BroadcastOperator {
        BroadcastOperator::new(Arc::clone(&self.adapter), self.nsp.clone(), self.default_timeout)
            .to_socket(&self.details.id)
    }

    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), SocketError> {
        self.operator().emit(event, args)
    }

    pub fn join<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().sockets_join(rooms);
    }

    pub fn leave<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        self.operator().sockets_leave(rooms);
    }

    pub fn disconnect(&self, close: bool) {
        self.operator().disconnect_sockets(close);
    }
}
