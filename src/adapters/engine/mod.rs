//! Engine layer adapters.
//!
//! - `EngineServer` - Request verification, handshake and connection table
//! - `Connection` - One session: heartbeat, write buffer, transport upgrade
//! - `WebSocketLink` - Bridge between an upgraded socket and its connection

mod connection;
mod server;
mod transport;

pub use connection::Connection;
pub use server::{EngineOptions, EngineResponse, EngineServer, WebSocketLink, PROTOCOL_REVISION};
pub use transport::WsCommand;
