//! HTTP adapters - axum binding of the engine endpoint.
//!
//! - `engine_router` - Long-polling and websocket routes on one path
//! - `cors_layer` - CORS policy from the configured origins

mod router;
mod websocket;

pub use router::{cors_layer, engine_router, EngineState};
