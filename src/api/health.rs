//! Liveness endpoint backed by the health collector.

use axum::{extract::State, http::StatusCode, Json};

use crate::health::HealthSnapshot;
use crate::server::AppState;

/// GET /health - same snapshot the scheduler broadcasts.
///
/// Responds 503 unless the status is `healthy`.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthSnapshot>) {
    let snapshot = state.health_collector.collect().await;

    let code = if snapshot.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(snapshot))
}
