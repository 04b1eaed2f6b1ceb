//! Liveness of the broker and its dependencies

use crate::api::rest::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub store: bool,
    pub upstream: bool,
}

/// `GET /health`: 200 when the store and upstream both answer, 503 otherwise
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthCheckResponse>) {
    let (store, upstream) = tokio::join!(state.store().ping(), state.upstream().ping());

    let (code, status) = if store && upstream {
        (StatusCode::OK, "healthy")
    } else {
        tracing::warn!(store, upstream, "Health check degraded");
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthCheckResponse {
            status: status.to_string(),
            version: state.version.clone(),
            uptime: state.uptime(),
            store,
            upstream,
        }),
    )
}
