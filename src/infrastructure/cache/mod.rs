//! Resilient caching layer.
//!
//! Redis is the primary store. When it is unreachable every operation is
//! served by a process-local [`LocalFallbackStore`] instead, so a Redis
//! outage costs cache hit ratio but never availability.
//!
//! - [`ConnectionManager`] - connection lifecycle, backoff, health probe
//! - [`DualModeCache`] - namespaced JSON cache routed by connection state
//! - [`LocalFallbackStore`] - in-memory store with TTL and a background sweeper
//! - [`RedisStore`] - Redis implementation of [`KeyValueStore`]
//! - [`CacheInfrastructure`] - builds and tears down all of the above

mod connection;
mod dual_mode;
mod local_store;
mod redis_store;
mod routing;
mod service;
mod stats;

pub use connection::{ConnectionManager, ConnectionSettings, backoff_delays};
pub use dual_mode::DualModeCache;
pub use local_store::LocalFallbackStore;
pub use redis_store::{RedisConnector, RedisStore, mask_url};
pub use routing::{Backend, route_decision};
pub use service::{CacheError, CacheResult, KeyValueStore, StoreConnector};
pub use stats::{CacheStats, NamespaceStats};

#[cfg(test)]
pub use service::{MockKeyValueStore, MockStoreConnector};

use crate::config::CacheConfig;
use crate::infrastructure::clock::{Clock, SystemClock};
use std::sync::Arc;
use tracing::info;

/// Process-wide cache components, created once at startup.
///
/// The parts are shared via `Arc` so the rate limiter and HTTP handlers
/// observe the same connection state as the cache. Rate limit counters get
/// their own local store so cached values never evict a block.
pub struct CacheInfrastructure {
    pub connection: Arc<ConnectionManager>,
    pub local: Arc<LocalFallbackStore>,
    pub limiter_local: Arc<LocalFallbackStore>,
    pub cache: Arc<DualModeCache>,
    pub clock: Arc<dyn Clock>,
    pub key_prefix: String,
}

impl CacheInfrastructure {
    /// Builds the cache stack from configuration and starts its background
    /// tasks: the local sweeper and, when Redis is configured, the connect
    /// cycle. Returns before Redis is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] if Redis is enabled but its URL
    /// cannot be parsed. A disabled or unreachable Redis is not an error.
    pub async fn init(config: &CacheConfig) -> CacheResult<Self> {
        let connector: Option<Arc<dyn StoreConnector>> = match config.distributed_url() {
            Some(url) => Some(Arc::new(RedisConnector::new(url)?)),
            None => {
                info!("Distributed cache disabled, serving from the local store only");
                None
            }
        };

        let infra = Self::from_parts(
            connector,
            config.connection.clone(),
            Arc::new(SystemClock),
            config.key_prefix.clone(),
            config.max_local_entries,
        );

        infra.local.start_sweeper(config.sweep_interval).await;
        infra.limiter_local.start_sweeper(config.sweep_interval).await;
        infra.connection.start().await;

        Ok(infra)
    }

    /// Wires the components together without starting any task.
    pub fn from_parts(
        connector: Option<Arc<dyn StoreConnector>>,
        settings: ConnectionSettings,
        clock: Arc<dyn Clock>,
        key_prefix: impl Into<String>,
        max_local_entries: usize,
    ) -> Self {
        let key_prefix = key_prefix.into();
        let connection = Arc::new(match connector {
            Some(connector) => ConnectionManager::new(connector, settings),
            None => ConnectionManager::disabled(settings),
        });
        let local = Arc::new(LocalFallbackStore::new(clock.clone(), max_local_entries));
        let limiter_local = Arc::new(LocalFallbackStore::new(clock.clone(), max_local_entries));
        let cache = Arc::new(DualModeCache::new(
            connection.clone(),
            local.clone(),
            key_prefix.clone(),
        ));

        Self {
            connection,
            local,
            limiter_local,
            cache,
            clock,
            key_prefix,
        }
    }

    /// Stops every background task and closes the Redis connection.
    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
        self.local.stop_sweeper().await;
        self.limiter_local.stop_sweeper().await;
        info!("Cache infrastructure stopped");
    }
}
