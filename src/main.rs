use anyhow::{Context, Result};
use fixrelay::api::{
    create_ingestion_router, create_status_router, create_ws_router, AppState, StatusAppState,
    WsAppState,
};
use fixrelay::config::{load_config, RelayConfig};
use fixrelay::metrics::RelayMetrics;
use fixrelay::presence::PresenceTracker;
use fixrelay::publisher::Publisher;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fixrelay=info".into()),
        )
        .init();

    let config = match std::env::var("FIXRELAY_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path).map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?
        }
        Err(_) => {
            info!("FIXRELAY_CONFIG not set, using defaults");
            RelayConfig::default()
        }
    };

    let metrics = RelayMetrics::new();
    let publisher = Arc::new(Publisher::with_capacity(
        config.channel.topic_capacity,
        metrics.clone(),
    ));
    let presence = Arc::new(PresenceTracker::new());

    let app = create_ingestion_router(AppState {
        publisher: Arc::clone(&publisher),
        presence: Arc::clone(&presence),
        metrics: metrics.clone(),
    })
    .merge(create_ws_router(Arc::new(WsAppState {
        publisher: Arc::clone(&publisher),
        metrics: metrics.clone(),
    })))
    .merge(create_status_router(StatusAppState {
        presence: Arc::clone(&presence),
        metrics: metrics.clone(),
        offline_after_seconds: config.presence.offline_after_seconds,
    }))
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .context(format!("failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Relay listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
