//! Ports - Interfaces between the protocol layer and its collaborators.
//!
//! Following hexagonal architecture, ports define the contracts; adapters
//! implement them.
//!
//! ## Room Ports
//!
//! - `Adapter` - Room membership, fan-out and cluster-wide queries
//! - `AdapterListener` - Room lifecycle and adapter error notifications
//! - `SocketDirectory` / `LocalSocket` - The namespace as seen by its adapter
//!
//! ## Bus Ports
//!
//! - `PubSubClient` - Publish/subscribe bus used by clustered adapters
//!
//! ## Engine Ports
//!
//! - `EngineSession` - One engine connection
//! - `EngineHandler` - Observer of engine connections
//! - `AllowRequest` - Admission hook

mod adapter;
mod engine;
mod pubsub;

pub use adapter::{
    AckCallback, Adapter, AdapterError, AdapterFactory, AdapterListener, ClientCountCallback,
    LocalSocket, ServerAck, SocketDirectory,
};
pub use engine::{AllowRequest, EngineHandler, EngineSession};
pub use pubsub::{PubSubClient, PubSubError, PubSubMessage};
