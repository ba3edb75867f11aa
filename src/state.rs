//! Shared state injected into every handler.

use crate::application::services::RateLimiter;
use crate::infrastructure::cache::{
    CacheInfrastructure, ConnectionManager, DualModeCache, LocalFallbackStore,
};
use std::sync::Arc;

/// Cheap-to-clone handle to the process-wide cache components.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<DualModeCache>,
    pub limiter: Arc<RateLimiter>,
    pub connection: Arc<ConnectionManager>,
    pub local: Arc<LocalFallbackStore>,
    /// Local store holding rate limit counters while Redis is unavailable.
    pub limiter_local: Arc<LocalFallbackStore>,
    /// Trust proxy headers when resolving the client address.
    pub behind_proxy: bool,
}

impl AppState {
    pub fn new(infra: &CacheInfrastructure, limiter: Arc<RateLimiter>, behind_proxy: bool) -> Self {
        Self {
            cache: infra.cache.clone(),
            limiter,
            connection: infra.connection.clone(),
            local: infra.local.clone(),
            limiter_local: infra.limiter_local.clone(),
            behind_proxy,
        }
    }
}
