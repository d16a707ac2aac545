//! Cluster transport over a publish/subscribe bus.
//!
//! Each node subscribes to three channel families for every namespace:
//!
//! ```text
//! {key}#{nsp}#*                 broadcasts without acknowledgement (pattern)
//! {key}-request#{nsp}#          every other request
//! {key}-response#{nsp}#{uid}#   responses addressed to this node
//! ```
//!
//! Outgoing messages go through one queue per adapter so that they reach the
//! bus in the order they were published.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::adapters::rooms::{
    ClusterAdapter, ClusterInbox, ClusterTransport, InMemoryAdapter, SessionStore,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::domain::broadcast::Room;
use crate::domain::cluster::{ClusterMessage, ClusterRequest, ClusterResponse};
use crate::domain::foundation::ServerUid;
use crate::domain::session::RecoveryOptions;
use crate::ports::{
    Adapter, AdapterError, AdapterFactory, PubSubClient, PubSubError, PubSubMessage,
    SocketDirectory,
};
use crate::sync::lock;

use super::codec;

/// A clustered adapter bound to a pub/sub bus.
pub type PubSubAdapter = ClusterAdapter<PubSubTransport>;

/// Settings shared by the adapters of every namespace.
#[derive(Debug, Clone)]
pub struct PubSubOptions {
    /// Prefix of every channel name.
    pub key: String,
    /// Deadline of cluster round trips without an explicit timeout.
    pub request_timeout: Duration,
    pub recovery: Option<RecoveryOptions>,
}

impl Default for PubSubOptions {
    fn default() -> Self {
        Self {
            key: "socket.io".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            recovery: None,
        }
    }
}

/// Builds one [`PubSubAdapter`] per namespace, all sharing `client`.
pub fn pubsub_adapter(client: Arc<dyn PubSubClient>, options: PubSubOptions) -> AdapterFactory {
    Arc::new(move |nsp: &str, directory: Weak<dyn SocketDirectory>| -> Arc<dyn Adapter> {
        let uid = ServerUid::new();
        let local = InMemoryAdapter::new(nsp, directory);
        let local = match &options.recovery {
            Some(recovery) => local.with_sessions(Arc::new(SessionStore::from_options(recovery))),
            None => local,
        };
        let transport = PubSubTransport::new(Arc::clone(&client), &options.key, nsp, uid.clone());
        ClusterAdapter::new(local, uid, transport, options.request_timeout)
    })
}

/// Channel names of one namespace, as seen by one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    key: String,
    nsp: String,
    pub broadcast: String,
    pub request: String,
    pub response: String,
}

impl Channels {
    pub fn new(key: &str, nsp: &str, uid: &ServerUid) -> Self {
        Self {
            key: key.to_string(),
            nsp: nsp.to_string(),
            broadcast: format!("{}#{}#", key, nsp),
            request: format!("{}-request#{}#", key, nsp),
            response: format!("{}-response#{}#{}#", key, nsp, uid),
        }
    }

    /// Channel of a plain broadcast, narrowed when it targets a single room.
    pub fn broadcast_to(&self, room: Option<&Room>) -> String {
        match room {
            Some(room) => format!("{}{}#", self.broadcast, room),
            None => self.broadcast.clone(),
        }
    }

    pub fn response_for(&self, requester: &ServerUid) -> String {
        format!("{}-response#{}#{}#", self.key, self.nsp, requester)
    }

    pub fn broadcast_pattern(&self) -> String {
        format!("{}*", self.broadcast)
    }
}

type Outbound = (String, Vec<u8>);

pub struct PubSubTransport {
    client: Arc<dyn PubSubClient>,
    uid: ServerUid,
    channels: Channels,
    outbound: mpsc::UnboundedSender<Outbound>,
    queued: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    inbox: Mutex<Option<Weak<dyn ClusterInbox>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PubSubTransport {
    pub fn new(client: Arc<dyn PubSubClient>, key: &str, nsp: &str, uid: ServerUid) -> Self {
        let (outbound, queued) = mpsc::unbounded_channel();
        Self {
            client,
            channels: Channels::new(key, nsp, &uid),
            uid,
            outbound,
            queued: Mutex::new(Some(queued)),
            inbox: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    fn enqueue(&self, channel: String, payload: Result<Vec<u8>, codec::CodecError>) {
        match payload {
            Ok(payload) => {
                tracing::debug!(uid = %self.uid, channel = %channel, "publishing cluster message");
                if self.outbound.send((channel, payload)).is_err() {
                    self.report(AdapterError::Closed);
                }
            }
            Err(error) => {
                tracing::warn!(uid = %self.uid, error = %error, "could not encode cluster message");
                self.report(AdapterError::Encoding(error.to_string()));
            }
        }
    }

    fn report(&self, error: AdapterError) {
        let inbox = lock(&self.inbox).as_ref().and_then(Weak::upgrade);
        if let Some(inbox) = inbox {
            inbox.on_error(error);
        }
    }
}

#[async_trait]
impl ClusterTransport for PubSubTransport {
    fn publish_request(&self, message: ClusterMessage) {
        let channel = match &message.request {
            ClusterRequest::Broadcast {
                opts,
                request_id: None,
                ..
            } => self.channels.broadcast_to(opts.single_room()),
            _ => self.channels.request.clone(),
        };
        self.enqueue(channel, codec::encode_request(&message));
    }

    fn publish_response(&self, requester: &ServerUid, response: ClusterResponse) {
        let channel = self.channels.response_for(requester);
        self.enqueue(channel, codec::encode_response(&response));
    }

    async fn server_count(&self) -> Result<usize, AdapterError> {
        let count = self.client.num_sub(&self.channels.request).await?;
        tracing::debug!(uid = %self.uid, count, "servers in the cluster");
        Ok(count)
    }

    async fn listen(&self, inbox: Weak<dyn ClusterInbox>) -> Result<(), AdapterError> {
        *lock(&self.inbox) = Some(inbox.clone());

        tracing::debug!(
            uid = %self.uid,
            pattern = %self.channels.broadcast_pattern(),
            request = %self.channels.request,
            response = %self.channels.response,
            "subscribing"
        );
        let mut messages = self
            .client
            .subscribe(
                vec![self.channels.request.clone(), self.channels.response.clone()],
                vec![self.channels.broadcast_pattern()],
            )
            .await?;

        let channels = self.channels.clone();
        let listen_inbox = inbox.clone();
        let listener = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                let Some(inbox) = listen_inbox.upgrade() else {
                    return;
                };
                route(&channels, inbox.as_ref(), message);
            }
            if let Some(inbox) = listen_inbox.upgrade() {
                inbox.on_error(PubSubError::Closed.into());
            }
        });

        let queued = lock(&self.queued).take();
        let mut tasks = lock(&self.tasks);
        tasks.push(listener);
        if let Some(mut queued) = queued {
            let client = Arc::clone(&self.client);
            tasks.push(tokio::spawn(async move {
                while let Some((channel, payload)) = queued.recv().await {
                    if let Err(error) = client.publish(&channel, payload).await {
                        tracing::error!(channel = %channel, error = %error, "publish failed");
                        if let Some(inbox) = inbox.upgrade() {
                            inbox.on_error(error.into());
                        }
                    }
                }
            }));
        }
        Ok(())
    }

    async fn close(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

/// Dispatches one bus message to the inbox; undecodable messages are dropped.
fn route(channels: &Channels, inbox: &dyn ClusterInbox, message: PubSubMessage) {
    if message.channel == channels.request {
        match codec::decode_request(&message.payload) {
            Ok(Some(request)) => inbox.on_request(request),
            Ok(None) => tracing::debug!("ignoring request of unknown type"),
            Err(error) => tracing::warn!(error = %error, "ignoring malformed request"),
        }
    } else if message.channel == channels.response {
        match codec::decode_response(&message.payload) {
            Ok(Some(response)) => inbox.on_response(response),
            Ok(None) => tracing::debug!("ignoring response of unknown type"),
            Err(error) => tracing::warn!(error = %error, "ignoring malformed response"),
        }
    } else if let Some(rest) = message.channel.strip_prefix(&channels.broadcast) {
        let room = rest.strip_suffix('#').unwrap_or(rest);
        if !room.is_empty() && !has_room(inbox, room) {
            tracing::debug!(room = %room, "ignoring broadcast to unknown room");
            return;
        }
        match codec::decode_broadcast(&message.payload) {
            Ok(request) => inbox.on_request(request),
            Err(error) => tracing::warn!(error = %error, "ignoring malformed broadcast"),
        }
    } else {
        tracing::debug!(channel = %message.channel, "ignoring message for channel");
    }
}

/// Room names travel as text in channel names; numeric rooms match too.
fn has_room(inbox: &dyn ClusterInbox, room: &str) -> bool {
    let numeric = room
        .parse::<i64>()
        .map(|n| inbox.has_room(&Room::Number(n)))
        .unwrap_or(false);
    numeric || inbox.has_room(&Room::from(room))
}
