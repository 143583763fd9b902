use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::presence::{PresenceStatus, PresenceTracker};
use axum::{extract::State, response::Json, routing::get, Router};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared application state for status endpoints
#[derive(Clone)]
pub struct StatusAppState {
    pub presence: Arc<PresenceTracker>,
    pub metrics: RelayMetrics,
    pub offline_after_seconds: i64,
}

/// Create router for presence and metrics endpoints
pub fn create_status_router(state: StatusAppState) -> Router {
    Router::new()
        .route("/api/location/status", get(location_status))
        .route("/api/metrics", get(metrics_snapshot))
        .with_state(Arc::new(state))
}

/// GET /api/location/status - Online/Offline per entity seen by the relay
async fn location_status(
    State(state): State<Arc<StatusAppState>>,
) -> Json<HashMap<String, PresenceStatus>> {
    Json(state.presence.statuses(state.offline_after_seconds))
}

/// GET /api/metrics - Relay counter snapshot
async fn metrics_snapshot(State(state): State<Arc<StatusAppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
