//! Adapter port - Room membership and fan-out for one namespace.
//!
//! An adapter owns the room indices of a namespace and reaches the
//! namespace's live sockets through a [`SocketDirectory`]. Local and
//! clustered adapters implement the same contract; callers never know
//! whether an operation crossed the network.
//!
//! ```text
//! BroadcastOperator ──► Adapter ──► SocketDirectory ──► LocalSocket
//!                          │
//!                          └──► cluster bus (clustered adapters only)
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::broadcast::{BroadcastOptions, Room};
use crate::domain::foundation::{PrivateId, Shortfall, Sid};
use crate::domain::protocol::Packet;
use crate::domain::session::{RestoredSession, Session, SocketDetails};

use super::pubsub::PubSubError;

/// Receives the number of clients a broadcast reached, once per node.
pub type ClientCountCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Receives the arguments of one client acknowledgement.
pub type AckCallback = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Replies to a server-side emit coming from another node.
pub type ServerAck = Box<dyn FnOnce(Value) + Send>;

/// Builds the adapter of a namespace from its name and directory.
///
/// The directory is handed over as a weak reference because the namespace
/// owns its adapter.
pub type AdapterFactory =
    Arc<dyn Fn(&str, Weak<dyn SocketDirectory>) -> Arc<dyn Adapter> + Send + Sync>;

/// Errors raised by adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("pub/sub failure: {0}")]
    PubSub(#[from] PubSubError),

    #[error("cluster message encoding failed: {0}")]
    Encoding(String),

    #[error("adapter is closed")]
    Closed,
}

/// Observer of room lifecycle and adapter failures.
///
/// Every method has an empty default so listeners implement only what
/// they need.
pub trait AdapterListener: Send + Sync {
    fn on_create_room(&self, _room: &Room) {}

    fn on_delete_room(&self, _room: &Room) {}

    fn on_join_room(&self, _room: &Room, _sid: &Sid) {}

    fn on_leave_room(&self, _room: &Room, _sid: &Sid) {}

    fn on_error(&self, _error: &AdapterError) {}
}

/// A socket attached to this node, as seen by its adapter.
pub trait LocalSocket: Send + Sync {
    fn id(&self) -> &Sid;

    /// Notifies outgoing listeners and writes the pre-encoded packet.
    ///
    /// A volatile write is dropped when the transport is not writable.
    fn deliver(&self, packet: &Packet, encoded: &str, volatile: bool);

    /// Registers the callback fired when the client acknowledges `id`.
    fn register_ack(&self, id: u64, ack: AckCallback);

    fn join(&self, rooms: &[Room]);

    fn leave(&self, room: &Room);

    fn disconnect(&self, close: bool);

    fn details(&self) -> SocketDetails;
}

/// The namespace side of an adapter: live sockets and server-side events.
pub trait SocketDirectory: Send + Sync {
    fn name(&self) -> &str;

    fn socket(&self, id: &Sid) -> Option<Arc<dyn LocalSocket>>;

    /// Next acknowledgement id; unique within the namespace.
    fn next_ack_id(&self) -> u64;

    /// Dispatches an event emitted by another node. `data` is `[event, ...args]`.
    fn on_server_side_emit(&self, data: Vec<Value>, ack: Option<ServerAck>);
}

/// Port for room membership and broadcast.
///
/// Membership and delivery calls are synchronous; only operations that may
/// wait for other nodes are async.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Starts background work (bus subscriptions, session pruning).
    async fn init(&self) -> Result<(), AdapterError>;

    /// Stops background work and cancels every pending timer.
    async fn close(&self);

    /// Number of nodes in the cluster, including this one.
    async fn server_count(&self) -> usize;

    /// Adds a socket to rooms. Joining a room twice has no effect.
    fn add_all(&self, id: &Sid, rooms: &[Room]);

    fn del(&self, id: &Sid, room: &Room);

    fn del_all(&self, id: &Sid);

    fn socket_rooms(&self, id: &Sid) -> Option<HashSet<Room>>;

    fn has_room(&self, room: &Room) -> bool;

    fn broadcast(&self, packet: Packet, opts: &BroadcastOptions);

    /// Broadcasts a packet expecting one acknowledgement per reached client.
    ///
    /// `on_client_count` fires once per node once its sockets are
    /// enumerated; `on_ack` fires for every acknowledgement.
    fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: &BroadcastOptions,
        on_client_count: ClientCountCallback,
        on_ack: AckCallback,
    );

    async fn fetch_sockets(
        &self,
        opts: &BroadcastOptions,
    ) -> Result<Vec<SocketDetails>, Shortfall<SocketDetails>>;

    fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]);

    fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]);

    fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool);

    /// Emits `[event, ...args]` to the other nodes.
    fn server_side_emit(&self, data: Vec<Value>);

    /// Emits to the other nodes and waits for one reply from each.
    async fn server_side_emit_with_ack(
        &self,
        data: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>, Shortfall<Value>>;

    fn persist_session(&self, session: Session);

    /// Finds an unexpired session and the packets emitted after `offset`.
    fn restore_session(&self, pid: &PrivateId, offset: &str) -> Option<RestoredSession>;

    fn subscribe(&self, listener: Arc<dyn AdapterListener>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn Adapter, _: &dyn SocketDirectory, _: &dyn LocalSocket) {}

    #[test]
    fn adapter_error_wraps_pubsub_failures() {
        let err = AdapterError::from(PubSubError::Closed);
        assert_eq!(err.to_string(), "pub/sub failure: subscription closed");
    }
}
