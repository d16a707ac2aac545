//! Redis-backed pub/sub bus for multi-server deployments.
//!
//! Publishing and `PUBSUB NUMSUB` share one multiplexed connection; every
//! subscription opens a dedicated connection, as Redis requires.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::ports::{PubSubClient, PubSubError, PubSubMessage};

#[derive(Clone)]
pub struct RedisPubSub {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisPubSub {
    /// Connects to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, PubSubError> {
        let client = redis::Client::open(url)
            .map_err(|e: redis::RedisError| PubSubError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e: redis::RedisError| PubSubError::Connection(e.to_string()))?;
        tracing::info!(url = %url, "connected to redis");
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl PubSubClient for RedisPubSub {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), PubSubError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e: redis::RedisError| PubSubError::Command(e.to_string()))
    }

    async fn subscribe(
        &self,
        channels: Vec<String>,
        patterns: Vec<String>,
    ) -> Result<BoxStream<'static, PubSubMessage>, PubSubError> {
        let mut pubsub = self
            .client
            .get_async_connection()
            .await
            .map_err(|e: redis::RedisError| PubSubError::Connection(e.to_string()))?
            .into_pubsub();

        for channel in &channels {
            pubsub
                .subscribe(channel)
                .await
                .map_err(|e: redis::RedisError| PubSubError::Command(e.to_string()))?;
        }
        for pattern in &patterns {
            pubsub
                .psubscribe(pattern)
                .await
                .map_err(|e: redis::RedisError| PubSubError::Command(e.to_string()))?;
        }

        let messages = pubsub.into_on_message().map(|msg| {
            PubSubMessage::new(msg.get_channel_name(), msg.get_payload_bytes().to_vec())
        });
        Ok(messages.boxed())
    }

    async fn num_sub(&self, channel: &str) -> Result<usize, PubSubError> {
        let mut conn = self.conn.clone();
        let (_, count): (String, usize) = redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(channel)
            .query_async(&mut conn)
            .await
            .map_err(|e: redis::RedisError| PubSubError::Command(e.to_string()))?;
        Ok(count)
    }
}
