//! HTTP routes for the engine endpoint.
//!
//! One path serves the handshake, polling GET/POST and the websocket
//! upgrade; every other path falls through to axum's 404.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::adapters::engine::{EngineResponse, EngineServer};
use crate::domain::engine::EngineRequest;

use super::websocket::pump;

/// Shared state of the engine routes.
#[derive(Clone)]
pub struct EngineState {
    pub engine: Arc<EngineServer>,
}

/// Creates the router serving `engine` on `path`.
pub fn engine_router(engine: Arc<EngineServer>, path: &str, cors_origins: &[String]) -> Router {
    let path = format!("/{}/", path.trim_matches('/'));
    let path = if path == "//" { "/".to_string() } else { path };
    let bare = path.trim_end_matches('/');

    let mut router = Router::new().route(&path, any(engine_endpoint));
    if !bare.is_empty() {
        router = router.route(bare, any(engine_endpoint));
    }
    router
        .with_state(EngineState { engine })
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

/// CORS policy; an empty list or `*` allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

#[allow(clippy::too_many_arguments)]
async fn engine_endpoint(
    State(state): State<EngineState>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    remote: Option<ConnectInfo<SocketAddr>>,
    ws: Option<WebSocketUpgrade>,
    body: Bytes,
) -> Response {
    let mut request = EngineRequest::new(method);
    request.query = query;
    request.headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    request.body = body.to_vec();
    request.upgrade = ws.is_some();
    request.remote_addr = remote.map(|ConnectInfo(addr)| addr.ip().to_string());
    request.url = uri.to_string();

    match ws {
        Some(ws) if request.transport() == "websocket" => {
            match state.engine.handle_upgrade(&request).await {
                Ok(link) => ws.on_upgrade(move |socket| pump(socket, link)),
                Err(rejection) => into_response(rejection),
            }
        }
        _ => into_response(state.engine.handle_request(request).await),
    }
}

fn into_response(response: EngineResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response()
}
