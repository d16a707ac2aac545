//! PubSubClient port - Interface to a publish/subscribe bus.
//!
//! The cluster adapter only needs three things from a bus: publishing a
//! payload to a channel, a stream of messages for a set of channels and
//! patterns, and the subscriber count of a channel.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl PubSubMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Errors that can occur talking to the bus.
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("subscription closed")]
    Closed,
}

/// Port for a publish/subscribe bus.
///
/// Delivery is at-least-once within one subscription; ordering across
/// channels is not assumed.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), PubSubError>;

    /// Subscribes to exact channels and glob patterns (`*` wildcard).
    async fn subscribe(
        &self,
        channels: Vec<String>,
        patterns: Vec<String>,
    ) -> Result<BoxStream<'static, PubSubMessage>, PubSubError>;

    /// Number of subscribers of an exact channel.
    async fn num_sub(&self, channel: &str) -> Result<usize, PubSubError>;
}
