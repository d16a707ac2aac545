//! Namespace middleware - runs for every socket before it is connected.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::MiddlewareError;
use super::socket::Socket;

/// A connection gate of a namespace.
///
/// Middlewares run in registration order; the first `Err` refuses the
/// connection.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, socket: Arc<Socket>) -> Result<(), MiddlewareError>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(Arc<Socket>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MiddlewareError>> + Send + 'static,
{
    async fn handle(&self, socket: Arc<Socket>) -> Result<(), MiddlewareError> {
        (self)(socket).await
    }
}
