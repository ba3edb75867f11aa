//! Handler for health check endpoint.

use axum::{Json, extract::State, http::StatusCode};

use crate::api::dto::health::{
    DistributedCacheStatus, HealthChecks, HealthResponse, LocalCacheStatus,
};
use crate::domain::ConnectionState;
use crate::state::AppState;

/// Returns service health status with component checks.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response Codes
///
/// - **200 OK**: Redis connected, or Redis disabled (memory-only mode)
/// - **503 Service Unavailable**: Redis enabled but not serving traffic
///
/// The local store keeps answering while degraded, so a 503 here means
/// "running on the fallback path", not "down".
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "checks": {
///     "distributed_cache": { "status": "ok", "enabled": true, "state": "connected", "epoch": 1 },
///     "local_cache": { "status": "ok", "entries": 42 }
///   }
/// }
/// ```
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let distributed = check_distributed(&state);
    let healthy = distributed.status == "ok";

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            distributed_cache: distributed,
            local_cache: LocalCacheStatus {
                status: "ok".to_string(),
                entries: state.local.len(),
            },
        },
    };

    if healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

fn check_distributed(state: &AppState) -> DistributedCacheStatus {
    let enabled = state.connection.is_enabled();
    let connection_state = state.connection.state();

    let (status, message) = match (enabled, connection_state) {
        (false, _) => ("ok", Some("Redis disabled, memory-only mode")),
        (true, ConnectionState::Connected) => ("ok", None),
        (true, ConnectionState::Degraded) => ("error", Some("Redis degraded, serving from local store")),
        (true, _) => ("error", Some("Redis not connected, serving from local store")),
    };

    DistributedCacheStatus {
        status: status.to_string(),
        enabled,
        state: connection_state,
        epoch: state.connection.epoch(),
        message: message.map(str::to_string),
    }
}
