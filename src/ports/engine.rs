//! Engine ports - Observer of engine connections and the admission hook.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::engine::{
    CloseReason, ConnectionError, EngineRequest, Frame, ReadyState, TransportKind,
};
use crate::domain::foundation::Sid;

/// One engine connection, as seen by the layer above.
pub trait EngineSession: Send + Sync {
    fn sid(&self) -> &Sid;

    /// Queues a message; a volatile message is dropped when not writable.
    fn send(&self, frame: Frame, volatile: bool);

    /// Closes the connection after flushing what is buffered.
    fn close(&self);

    fn ready_state(&self) -> ReadyState;

    fn transport(&self) -> TransportKind;
}

/// The single subscriber of engine connection events.
pub trait EngineHandler: Send + Sync {
    fn on_connection(&self, session: Arc<dyn EngineSession>, request: &EngineRequest);

    fn on_message(&self, sid: &Sid, frame: Frame);

    fn on_close(&self, sid: &Sid, reason: CloseReason);

    fn on_connection_error(&self, _error: &ConnectionError) {}
}

/// Admission hook run on every request that passed protocol verification.
///
/// An `Err` refuses the request with its reason.
#[async_trait]
pub trait AllowRequest: Send + Sync {
    async fn allow(&self, request: &EngineRequest) -> Result<(), String>;
}

#[async_trait]
impl<F, Fut> AllowRequest for F
where
    F: Fn(EngineRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    async fn allow(&self, request: &EngineRequest) -> Result<(), String> {
        (self)(request.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[tokio::test]
    async fn closures_can_be_admission_hooks() {
        let hook = |req: EngineRequest| async move {
            if req.query.contains_key("token") {
                Ok(())
            } else {
                Err("missing token".to_string())
            }
        };

        let denied = EngineRequest::new(Method::GET);
        assert_eq!(hook.allow(&denied).await, Err("missing token".to_string()));

        let allowed = EngineRequest::new(Method::GET).with_query("token", "t");
        assert!(hook.allow(&allowed).await.is_ok());
    }
}
