//! Pub/sub cluster binding.
//!
//! - `PubSubAdapter` - Cluster adapter whose transport is a pub/sub bus
//! - `codec` - JSON / MessagePack envelopes shared with other nodes
//! - `RedisPubSub` - Redis client for the bus
//! - `InMemoryPubSub` - Process-local bus

mod adapter;
pub mod codec;
mod in_memory;
mod redis;

pub use adapter::{pubsub_adapter, Channels, PubSubAdapter, PubSubOptions, PubSubTransport};
pub use in_memory::InMemoryPubSub;
pub use redis::RedisPubSub;
