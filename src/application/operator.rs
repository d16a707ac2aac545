//! Broadcast query builder.
//!
//! ```text
//! server.to("room1").except("room2").volatile().emit("hello", args)
//! ```
//!
//! Each modifier returns a new operator; the adapter receives the final
//! options as one immutable value.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::domain::broadcast::{BroadcastFlags, BroadcastOptions, Room};
use crate::domain::foundation::{Shortfall, Sid};
use crate::domain::protocol::{is_reserved_event, Packet};
use crate::domain::session::SocketDetails;
use crate::ports::{AckCallback, Adapter, ClientCountCallback};
use crate::sync::lock;

use super::error::SocketError;
use super::remote::RemoteSocket;

#[derive(Clone)]
pub struct BroadcastOperator {
    adapter: Arc<dyn Adapter>,
    nsp: String,
    rooms: HashSet<Room>,
    except: HashSet<Room>,
    flags: BroadcastFlags,
    default_timeout: Duration,
}

impl BroadcastOperator {
    pub fn new(adapter: Arc<dyn Adapter>, nsp: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            adapter,
            nsp: nsp.into(),
            rooms: HashSet::new(),
            except: HashSet::new(),
            flags: BroadcastFlags::default(),
            default_timeout,
        }
    }

    /// Targets a room; several calls target the union of the rooms.
    pub fn to(mut self, room: impl Into<Room>) -> Self {
        self.rooms.insert(room.into());
        self
    }

    pub fn in_room(self, room: impl Into<Room>) -> Self {
        self.to(room)
    }

    pub fn except(mut self, room: impl Into<Room>) -> Self {
        self.except.insert(room.into());
        self
    }

    /// Restricts the operation to this node.
    pub fn local(mut self) -> Self {
        self.flags.local = Some(true);
        self
    }

    /// Drops the packet for clients whose transport is not writable.
    pub fn volatile(mut self) -> Self {
        self.flags.volatile = Some(true);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.flags.timeout = Some(timeout.as_millis() as u64);
        self
    }

    pub fn options(&self) -> BroadcastOptions {
        BroadcastOptions {
            rooms: self.rooms.clone(),
            except: self.except.clone(),
            flags: self.flags.clone(),
        }
    }

    fn event(&self, event: &str, args: Vec<Value>) -> Result<Packet, SocketError> {
        if is_reserved_event(event) {
            return Err(SocketError::ReservedEvent(event.to_string()));
        }
        Ok(Packet::event(self.nsp.as_str(), event, args))
    }

    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), SocketError> {
        let packet = self.event(event, args)?;
        self.adapter.broadcast(packet, &self.options());
        Ok(())
    }

    /// Emits the `message` event.
    pub fn send(&self, args: Vec<Value>) -> Result<(), SocketError> {
        self.emit("message", args)
    }

    /// Emits and collects one acknowledgement per reached client, across
    /// every node of the cluster.
    ///
    /// Resolves once every node reported its client count and every counted
    /// client answered; otherwise fails at the deadline with the responses
    /// collected so far.
    pub async fn emit_with_ack(
        &self,
        event: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, SocketError> {
        let packet = self.event(event, args)?;
        let timeout = self.flags.timeout().unwrap_or(self.default_timeout);

        let (done, finished) = oneshot::channel();
        let tally = Arc::new(Mutex::new(AckTally::new(done)));

        let counter = Arc::clone(&tally);
        let on_client_count: ClientCountCallback = Arc::new(move |count| {
            let mut tally = lock(&counter);
            tally.servers += 1;
            tally.expected_clients += count;
            tally.check();
        });
        let collector = Arc::clone(&tally);
        let on_ack: AckCallback = Arc::new(move |args| {
            let mut tally = lock(&collector);
            tally
                .responses
                .push(args.into_iter().next().unwrap_or(Value::Null));
            tally.check();
        });

        self.adapter
            .broadcast_with_ack(packet, &self.options(), on_client_count, on_ack);

        let server_count = self.adapter.server_count().await;
        {
            let mut tally = lock(&tally);
            tally.expected_servers = Some(server_count);
            tally.check();
        }

        let completed = tokio::time::timeout(timeout, finished).await.is_ok();
        let mut tally = lock(&tally);
        tally.done = None;
        let responses = tally.responses.clone();
        if completed {
            Ok(responses)
        } else {
            Err(SocketError::Timeout(Shortfall::new(
                tally.expected_clients,
                responses,
            )))
        }
    }

    pub async fn fetch_sockets(&self) -> Result<Vec<RemoteSocket>, Shortfall<SocketDetails>> {
        let details = self.adapter.fetch_sockets(&self.options()).await?;
        Ok(details
            .into_iter()
            .map(|details| {
                RemoteSocket::new(
                    Arc::clone(&self.adapter),
                    self.nsp.clone(),
                    details,
                    self.default_timeout,
                )
            })
            .collect())
    }

    pub fn sockets_join<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        let rooms: Vec<Room> = rooms.into_iter().map(Into::into).collect();
        self.adapter.add_sockets(&self.options(), &rooms);
    }

    pub fn sockets_leave<I, R>(&self, rooms: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Room>,
    {
        let rooms: Vec<Room> = rooms.into_iter().map(Into::into).collect();
        self.adapter.del_sockets(&self.options(), &rooms);
    }

    pub fn disconnect_sockets(&self, close: bool) {
        self.adapter.disconnect_sockets(&self.options(), close);
    }

    /// Targets one socket by id.
    pub(crate) fn to_socket(self, id: &Sid) -> Self {
        self.to(id)
    }
}

struct AckTally {
    expected_servers: Option<usize>,
    servers: usize,
    expected_clients: usize,
    responses: Vec<Value>,
    done: Option<oneshot::Sender<()>>,
}

impl AckTally {
    fn new(done: oneshot::Sender<()>) -> Self {
        Self {
            expected_servers: None,
            servers: 0,
            expected_clients: 0,
            responses: Vec::new(),
            done: Some(done),
        }
    }

    fn check(&mut self) {
        if self.expected_servers == Some(self.servers)
            && self.responses.len() == self.expected_clients
        {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
        }
    }
}
