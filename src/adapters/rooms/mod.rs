//! Room adapters - Membership indices, fan-out and cluster coordination.
//!
//! - `InMemoryAdapter` - Single-node rooms and delivery
//! - `ClusterAdapter` - Replicates the local adapter's effects to peers
//! - `SessionStore` - Connection state recovery log
//! - `TimerSet` - Keyed expiry timers cancelled together on teardown

mod cluster;
mod index;
mod memory;
mod sessions;
mod timers;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{ClusterAdapter, ClusterInbox, ClusterTransport, DEFAULT_REQUEST_TIMEOUT};
pub use index::{RoomEvent, RoomIndex};
pub use memory::{in_memory_adapter, InMemoryAdapter};
pub use sessions::{SessionStore, PRUNE_INTERVAL};
pub use timers::TimerSet;
