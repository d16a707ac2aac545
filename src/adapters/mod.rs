//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the protocol layer to the outside world:
//! - `engine` - Engine connections over long-polling and websocket
//! - `http` - axum routes serving the engine endpoint
//! - `rooms` - Room adapters (local and cluster-aware)
//! - `pubsub` - Pub/sub bus binding of the cluster adapter (Redis, in-memory)

pub mod engine;
pub mod http;
pub mod pubsub;
pub mod rooms;

pub use engine::{EngineOptions, EngineServer};
pub use pubsub::{pubsub_adapter, InMemoryPubSub, PubSubOptions, RedisPubSub};
pub use rooms::{in_memory_adapter, InMemoryAdapter};
