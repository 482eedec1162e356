use axum::{extract::State, Json};
use chrono::Utc;

use crate::server::AppState;
use crate::types::HealthResponse;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: Some("Q&A relay is running".to_string()),
        active_streams: state.relay.registry().active_count(),
        timestamp: Utc::now(),
    })
}
