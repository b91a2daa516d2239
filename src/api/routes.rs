use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::health::health;
use super::metrics::prometheus_metrics;
use super::system::{system_notification, system_stats};

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health & metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Operator endpoints
        .nest(
            "/api/v1/system",
            Router::new()
                .route("/stats", get(system_stats))
                .route("/notifications", post(system_notification))
                .route_layer(middleware::from_fn_with_state(state, api_key_auth)),
        )
}
