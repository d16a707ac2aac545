//! Application layer - The socket protocol on top of engine connections.
//!
//! - `Server` - Namespaces, clients and the engine they ride on
//! - `Namespace` - Sockets, middlewares and server-side event handlers
//! - `Socket` - One client in one namespace
//! - `Client` - One engine connection, demultiplexed by namespace
//! - `BroadcastOperator` - Room-targeted emission and queries
//! - `RemoteSocket` - A socket returned by `fetch_sockets`, on any node

mod client;
mod error;
mod middleware;
mod namespace;
mod operator;
mod remote;
mod server;
mod socket;

pub use client::Client;
pub use error::{MiddlewareError, SocketError};
pub use middleware::Middleware;
pub use namespace::{ConnectionHandler, Namespace, ServerEventHandler};
pub use operator::BroadcastOperator;
pub use remote::RemoteSocket;
pub use server::{Server, ServerOptions};
pub use socket::{AckResponder, AnyListener, DisconnectHandler, EventHandler, ListenerId, Socket};
