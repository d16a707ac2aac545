//! Relayio - Real-time bidirectional messaging server
//!
//! Engine connections over long-polling and websocket with transparent
//! upgrade, a socket layer with namespaces, rooms and acknowledgements,
//! and a cluster adapter replicating broadcasts and room operations across
//! nodes through a pub/sub bus.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

mod sync;
