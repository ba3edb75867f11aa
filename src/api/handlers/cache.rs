//! Handler for cache statistics.

use axum::{Json, extract::State};

use crate::api::dto::health::CacheStatsResponse;
use crate::state::AppState;

/// Per-namespace hit/miss counters and backend status.
///
/// # Endpoint
///
/// `GET /api/cache/stats`
pub async fn cache_stats_handler(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        state: state.connection.state(),
        local_entries: state.local.len(),
        limiter_entries: state.limiter_local.len(),
        pending_sync: state.cache.pending_sync().await,
        stats: state.cache.stats(),
    })
}
