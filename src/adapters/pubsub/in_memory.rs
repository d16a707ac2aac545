//! In-process pub/sub bus.
//!
//! Behaves like a single Redis server shared by every adapter of the
//! process: exact channels, `*` patterns and per-channel subscriber counts.
//! Used by tests and by single-host deployments running several servers.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::ports::{PubSubClient, PubSubError, PubSubMessage};
use crate::sync::lock;

struct Subscriber {
    channels: HashSet<String>,
    patterns: Vec<String>,
    tx: mpsc::UnboundedSender<PubSubMessage>,
}

impl Subscriber {
    fn wants(&self, channel: &str) -> bool {
        self.channels.contains(channel) || self.patterns.iter().any(|p| glob_matches(p, channel))
    }
}

#[derive(Default)]
pub struct InMemoryPubSub {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl PubSubClient for InMemoryPubSub {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), PubSubError> {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| !s.tx.is_closed());
        for subscriber in subscribers.iter().filter(|s| s.wants(channel)) {
            let _ = subscriber
                .tx
                .unbounded_send(PubSubMessage::new(channel, payload.clone()));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: Vec<String>,
        patterns: Vec<String>,
    ) -> Result<BoxStream<'static, PubSubMessage>, PubSubError> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.subscribers).push(Subscriber {
            channels: channels.into_iter().collect(),
            patterns,
            tx,
        });
        Ok(rx.boxed())
    }

    async fn num_sub(&self, channel: &str) -> Result<usize, PubSubError> {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| !s.tx.is_closed());
        Ok(subscribers
            .iter()
            .filter(|s| s.channels.contains(channel))
            .count())
    }
}

/// Glob matching with `*` as the only wildcard.
fn glob_matches(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
