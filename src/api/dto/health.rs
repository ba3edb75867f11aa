//! DTOs for the health and cache endpoints.

use crate::domain::ConnectionState;
use crate::infrastructure::cache::CacheStats;
use serde::Serialize;

/// Health check response with component status.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

/// Health status for each cache component.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub distributed_cache: DistributedCacheStatus,
    pub local_cache: LocalCacheStatus,
}

/// Redis connection as seen by the connection manager.
#[derive(Debug, Serialize)]
pub struct DistributedCacheStatus {
    pub status: String,
    pub enabled: bool,
    pub state: ConnectionState,
    pub epoch: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LocalCacheStatus {
    pub status: String,
    pub entries: usize,
}

/// Response for `GET /api/cache/stats`.
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub state: ConnectionState,
    pub local_entries: usize,
    pub limiter_entries: usize,
    pub pending_sync: usize,
    #[serde(flatten)]
    pub stats: CacheStats,
}
