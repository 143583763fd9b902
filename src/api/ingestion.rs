use crate::metrics::RelayMetrics;
use crate::position::PositionUpdate;
use crate::presence::PresenceTracker;
use crate::publisher::Publisher;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared application state for ingestion
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<Publisher>,
    pub presence: Arc<PresenceTracker>,
    pub metrics: RelayMetrics,
}

/// Success response for an accepted position write
#[derive(Serialize)]
struct AcceptedResponse {
    status: String,
    #[serde(rename = "entityId")]
    entity_id: String,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create API router with the ingestion endpoint
pub fn create_ingestion_router(state: AppState) -> Router {
    Router::new()
        .route("/api/location", post(publish_location))
        .with_state(Arc::new(state))
}

/// POST /api/location - Accept one position write and fan it out
///
/// The Position Store calls this after persisting a fix; the relay does
/// not retain it. Fan-out to subscribers cannot fail the caller.
async fn publish_location(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    let mut update: PositionUpdate = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    // Validates and canonicalizes the entity id in place
    update
        .validate_and_prepare()
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    info!(
        entity_id = %update.entity_id,
        latitude = update.latitude,
        longitude = update.longitude,
        "Ingesting position update"
    );

    let entity_id = update.entity_id.clone();
    state.presence.record(&entity_id);
    state.publisher.publish(update);

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted".to_string(),
            entity_id,
        }),
    ))
}

/// Application error types
enum AppError {
    ValidationError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::ValidationError(msg) => {
                let body = Json(ErrorResponse { error: msg });
                (StatusCode::BAD_REQUEST, body).into_response()
            }
        }
    }
}
