use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `degraded` when jobs are not durably stored.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Job store backend (`postgres` or `memory`).
    pub storage: &'static str,
    /// Whether the database is reachable. `false` in memory mode.
    pub db_healthy: bool,
    pub provider: &'static str,
    pub pipeline_mode: &'static str,
}

/// GET /health -- returns service, storage and provider health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = match &state.pool {
        Some(pool) => meshsmith_db::health_check(pool).await.is_ok(),
        None => false,
    };

    let status = if db_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        storage: state.service.storage_backend(),
        db_healthy,
        provider: state.service.provider_kind().as_str(),
        pipeline_mode: state.service.mode().as_str(),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
