//! Relayio server binary.
//!
//! Loads configuration from the environment, installs logging, picks the
//! cluster bus and serves the endpoint until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use relayio::adapters::{pubsub_adapter, PubSubOptions, RedisPubSub};
use relayio::application::{Server, ServerOptions};
use relayio::config::AppConfig;
use relayio::ports::{AdapterFactory, PubSubClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    init_logging(&config);

    let adapter = cluster_adapter(&config).await?;
    let options = ServerOptions {
        path: config.socket.path.clone(),
        engine: config.engine.to_options()?,
        connect_timeout: config.socket.connect_timeout(),
        ack_timeout: config.socket.ack_timeout(),
        connection_state_recovery: config.socket.recovery(),
        cors_origins: config.server.cors_origins_list(),
        adapter,
        allow_request: None,
    };
    let server = Server::new(options).await?;

    server.on_connection(|socket| {
        tracing::info!(sid = %socket.id(), "socket connected");
    });

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, path = %server.path(), "listening");

    let app = server.router();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    server.close().await;
    Ok(())
}

/// JSON lines in production, human-readable output otherwise.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.server.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = if config.is_production() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry().with(layer).init();
}

/// The Redis-backed adapter when a URL is configured; `None` keeps the
/// in-memory single-node adapter.
async fn cluster_adapter(
    config: &AppConfig,
) -> Result<Option<AdapterFactory>, Box<dyn std::error::Error>> {
    let Some(url) = config.redis.url.as_deref().filter(|_| config.redis.is_enabled()) else {
        tracing::info!("no redis url configured, running as a single node");
        return Ok(None);
    };
    let client: Arc<dyn PubSubClient> = Arc::new(RedisPubSub::connect(url).await?);
    let options = PubSubOptions {
        key: config.redis.key_prefix.clone(),
        request_timeout: config.redis.request_timeout(),
        recovery: config.socket.recovery(),
    };
    Ok(Some(pubsub_adapter(client, options)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
