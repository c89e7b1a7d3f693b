use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::AppState;
use crate::metrics::MetricsSnapshot;

#[derive(Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    /// Users currently reachable for live pushes
    pub online_users: usize,
}

/// Metrics endpoint - relay counters plus registry size
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(MetricsResponse {
        snapshot: state.metrics.snapshot(),
        online_users: state.relay.registry().len().await,
    })
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - returns 200 once the database answers
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let db_ok = state.db.pool.acquire().await.is_ok();

    if db_ok {
        Json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected"
            })),
        )
            .into_response()
    }
}
