//! Health check endpoints for liveness and readiness probes.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::errors::ApiResponse;
use crate::AppState;

/// Readiness probe detail.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub database: String,
    pub redis: String,
    pub storage: String,
}

/// Liveness probe — always returns OK if the process is running.
pub async fn live() -> &'static str {
    "OK"
}

/// Readiness probe — checks database, Redis and depot.
pub async fn ready(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let db_status = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "connected".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            format!("error: {e}")
        }
    };

    let redis_status = match state.redis.get_multiplexed_async_connection().await {
        Ok(_) => "connected".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Redis health check failed");
            format!("error: {e}")
        }
    };

    let storage_status = if state.depot.is_available().await {
        "available".to_string()
    } else {
        tracing::warn!("Depot health check failed");
        "unavailable".to_string()
    };

    let healthy = db_status == "connected"
        && redis_status == "connected"
        && storage_status == "available";

    ApiResponse::success(HealthStatus {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        database: db_status,
        redis: redis_status,
        storage: storage_status,
    })
}
