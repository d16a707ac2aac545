//! Domain layer: value types shared by the engine, the protocol layer and
//! the adapters. Nothing here performs I/O.
//!
//! # Module Organization
//!
//! - `foundation` - Identifiers, timestamps, state machine trait, shared errors
//! - `engine` - Engine packets, payload framing, connection lifecycle
//! - `protocol` - Application packets and disconnect reasons
//! - `broadcast` - Rooms and broadcast options
//! - `cluster` - Requests and responses exchanged between nodes
//! - `session` - Socket snapshots and reconnection state

pub mod broadcast;
pub mod cluster;
pub mod engine;
pub mod foundation;
pub mod protocol;
pub mod session;
