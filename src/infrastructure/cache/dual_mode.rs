//! Cache facade that routes between Redis and the local fallback store.

use super::connection::ConnectionManager;
use super::local_store::LocalFallbackStore;
use super::service::{CacheResult, KeyValueStore};
use super::stats::{CacheStats, StatsRecorder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Mutations made on the local store that Redis has not seen yet.
#[derive(Debug, Default)]
struct PendingSync {
    keys: HashSet<String>,
    patterns: Vec<String>,
}

impl PendingSync {
    fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.patterns.is_empty()
    }
}

/// Key/value cache that survives distributed-store outages.
///
/// # Routing
///
/// While the [`ConnectionManager`] reports `Connected`, operations go to Redis;
/// otherwise they go to the [`LocalFallbackStore`]. A Redis failure on any
/// single operation falls back to the local store for that operation, so
/// callers never see a cache failure, only a possible miss.
///
/// # Consistency across backends
///
/// - Writes to Redis are mirrored into the local store, so values written
///   while connected stay readable after a degradation.
/// - Writes, deletes and pattern invalidations made while Redis is enabled
///   but not connected are remembered. After the connection recovers, the
///   first operation pushes them to Redis, so stale Redis entries never
///   shadow newer local writes.
/// - A write Redis rejects while connected (e.g. out of memory) lands locally,
///   the old Redis value is dropped, and reads of that key stay local until a
///   later write or sync succeeds.
///
/// # Encoding
///
/// Values are stored as JSON. A payload that fails to decode is reported as a
/// miss and overwritten by the next `set`.
///
/// # Example
///
/// ```rust,ignore
/// cache.set("links", "abc123", &link, 3600).await;
/// let cached: Option<CachedLink> = cache.get("links", "abc123").await;
/// ```
pub struct DualModeCache {
    connection: Arc<ConnectionManager>,
    local: Arc<LocalFallbackStore>,
    key_prefix: String,
    stats: StatsRecorder,
    pending: Mutex<PendingSync>,
    synced_epoch: AtomicU64,
}

impl DualModeCache {
    pub fn new(
        connection: Arc<ConnectionManager>,
        local: Arc<LocalFallbackStore>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            local,
            key_prefix: key_prefix.into(),
            stats: StatsRecorder::default(),
            pending: Mutex::new(PendingSync::default()),
            synced_epoch: AtomicU64::new(0),
        }
    }

    /// Reads and decodes the value at `namespace`/`key`.
    ///
    /// Returns `None` on a miss, an expired entry, or an undecodable payload.
    /// Every call counts as a hit or miss for `namespace`.
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let full_key = self.build_key(namespace, key);

        let value = self.read_raw(&full_key).await.and_then(|raw| {
            serde_json::from_str::<T>(&raw)
                .map_err(|e| {
                    warn!(key = %full_key, error = %e, "Cached payload failed to decode, treating as miss");
                })
                .ok()
        });

        self.stats.record(namespace, value.is_some());
        value
    }

    /// Encodes and stores `value`. `ttl_seconds == 0` stores without expiry.
    ///
    /// Returns `false` only if the value cannot be encoded or neither backend
    /// accepted the write.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> bool {
        let full_key = self.build_key(namespace, key);
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to encode cache value");
                return false;
            }
        };
        let ttl = ttl_from_secs(ttl_seconds);

        let distributed = self.distributed().await;
        if let Some(store) = &distributed {
            match self
                .connection
                .guarded("set", store.set(&full_key, &payload, ttl))
                .await
            {
                Ok(()) => {
                    self.mirror(self.local.set(&full_key, &payload, ttl).await, &full_key);
                    self.clear_pending(&full_key).await;
                    return true;
                }
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Redis SET failed, writing to local store");
                    if !e.is_transport() {
                        self.discard(store.as_ref(), &full_key).await;
                    }
                }
            }
        }

        let mut pending = self.pending.lock().await;
        match self.local.set(&full_key, &payload, ttl).await {
            Ok(()) => {
                if self.connection.is_enabled() {
                    pending.keys.insert(full_key);
                    if distributed.is_none() {
                        self.settle(&mut pending).await;
                    }
                }
                true
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Local cache SET failed");
                false
            }
        }
    }

    /// Removes `namespace`/`key` from whichever backend is active.
    pub async fn delete(&self, namespace: &str, key: &str) -> bool {
        let full_key = self.build_key(namespace, key);

        let distributed = self.distributed().await;
        if let Some(store) = &distributed {
            match self.connection.guarded("delete", store.delete(&full_key)).await {
                Ok(_) => {
                    self.mirror(self.local.delete(&full_key).await.map(drop), &full_key);
                    self.clear_pending(&full_key).await;
                    return true;
                }
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Redis DEL failed, deleting locally");
                }
            }
        }

        let mut pending = self.pending.lock().await;
        match self.local.delete(&full_key).await {
            Ok(_) => {
                if self.connection.is_enabled() {
                    pending.keys.insert(full_key);
                    if distributed.is_none() {
                        self.settle(&mut pending).await;
                    }
                }
                true
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Local cache DEL failed");
                false
            }
        }
    }

    /// Removes every key matching a Redis-style glob (e.g. `links:*`).
    ///
    /// The pattern is applied below the configured key prefix. Local entries
    /// are always cleared; if Redis is unavailable the invalidation is replayed
    /// there after recovery.
    pub async fn invalidate_pattern(&self, pattern: &str) -> bool {
        let full_pattern = format!("{}{}", self.key_prefix, pattern);

        let local_ok = match self.local.delete_pattern(&full_pattern).await {
            Ok(removed) => {
                debug!(pattern = %full_pattern, removed, "Local cache pattern invalidation");
                true
            }
            Err(e) => {
                warn!(pattern = %full_pattern, error = %e, "Local cache pattern invalidation failed");
                false
            }
        };

        let distributed = self.distributed().await;
        if let Some(store) = &distributed {
            match self
                .connection
                .guarded("delete_pattern", store.delete_pattern(&full_pattern))
                .await
            {
                Ok(removed) => {
                    debug!(pattern = %full_pattern, removed, "Redis pattern invalidation");
                    return local_ok;
                }
                Err(e) => {
                    warn!(pattern = %full_pattern, error = %e, "Redis pattern invalidation failed, will replay after recovery");
                }
            }
        }

        if local_ok && self.connection.is_enabled() {
            let mut pending = self.pending.lock().await;
            pending.patterns.push(full_pattern);
            if distributed.is_none() {
                self.settle(&mut pending).await;
            }
        }
        local_ok
    }

    /// Hit/miss counters per namespace.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Number of local mutations waiting to be pushed to Redis.
    pub async fn pending_sync(&self) -> usize {
        let pending = self.pending.lock().await;
        pending.keys.len() + pending.patterns.len()
    }

    fn build_key(&self, namespace: &str, key: &str) -> String {
        format!("{}{}:{}", self.key_prefix, namespace, key)
    }

    async fn read_raw(&self, full_key: &str) -> Option<String> {
        if let Some(store) = self.distributed().await
            && !self.is_pending(full_key).await
        {
            match self.connection.guarded("get", store.get(full_key)).await {
                Ok(value) => return value,
                Err(e) => {
                    debug!(key = %full_key, error = %e, "Redis GET failed, reading local store");
                }
            }
        }

        self.local.get(full_key).await.unwrap_or_else(|e| {
            warn!(key = %full_key, error = %e, "Local cache GET failed");
            None
        })
    }

    /// The distributed store when routing selects it, synced with local writes.
    async fn distributed(&self) -> Option<Arc<dyn KeyValueStore>> {
        let store = self.connection.active_store().await?;
        let epoch = self.connection.epoch();

        if self.synced_epoch.load(Ordering::Acquire) == epoch {
            return Some(store);
        }

        match self.sync_pending(store.as_ref(), epoch).await {
            Ok(()) => Some(store),
            Err(e) => {
                warn!(error = %e, "Failed to push local writes to Redis, staying on local store");
                None
            }
        }
    }

    async fn sync_pending(&self, store: &dyn KeyValueStore, epoch: u64) -> CacheResult<()> {
        let mut pending = self.pending.lock().await;
        if self.synced_epoch.load(Ordering::Acquire) == epoch {
            return Ok(());
        }

        self.flush(store, &mut pending).await?;
        self.synced_epoch.store(epoch, Ordering::Release);
        Ok(())
    }

    /// Pushes every pending mutation to Redis. Patterns go first so a key
    /// written after an invalidation survives it.
    async fn flush(&self, store: &dyn KeyValueStore, pending: &mut PendingSync) -> CacheResult<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let patterns = pending.patterns.len();
        let keys = pending.keys.len();

        for pattern in &pending.patterns {
            self.connection
                .guarded("sync_delete_pattern", store.delete_pattern(pattern))
                .await?;
        }
        pending.patterns.clear();

        let dirty: Vec<String> = pending.keys.iter().cloned().collect();
        for key in dirty {
            self.push_key(store, &key).await?;
            pending.keys.remove(&key);
        }

        info!(keys, patterns, "Pushed writes made during outage to Redis");
        Ok(())
    }

    /// Flushes a just-recorded local mutation when Redis came back and the
    /// sync for the new epoch already ran between routing and recording.
    async fn settle(&self, pending: &mut PendingSync) {
        let epoch = self.connection.epoch();
        if self.synced_epoch.load(Ordering::Acquire) != epoch {
            return;
        }
        let Some(store) = self.connection.active_store().await else {
            return;
        };

        if let Err(e) = self.flush(store.as_ref(), pending).await {
            warn!(error = %e, "Failed to push late local write to Redis");
        }
    }

    async fn is_pending(&self, full_key: &str) -> bool {
        self.pending.lock().await.keys.contains(full_key)
    }

    async fn clear_pending(&self, full_key: &str) {
        self.pending.lock().await.keys.remove(full_key);
    }

    /// Best-effort removal of a Redis value that a rejected write left behind.
    async fn discard(&self, store: &dyn KeyValueStore, full_key: &str) {
        if let Err(e) = self
            .connection
            .guarded("discard", store.delete(full_key))
            .await
        {
            debug!(key = %full_key, error = %e, "Could not drop stale Redis value");
        }
    }

    async fn push_key(&self, store: &dyn KeyValueStore, key: &str) -> CacheResult<()> {
        match self.local.get(key).await? {
            Some(value) => {
                let ttl = self.local.ttl(key).await?;
                self.connection
                    .guarded("sync_set", store.set(key, &value, ttl))
                    .await
            }
            None => self
                .connection
                .guarded("sync_delete", store.delete(key))
                .await
                .map(drop),
        }
    }

    fn mirror(&self, result: CacheResult<()>, key: &str) {
        if let Err(e) = result {
            debug!(key, error = %e, "Local mirror write failed");
        }
    }
}

fn ttl_from_secs(ttl_seconds: u64) -> Option<Duration> {
    (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds))
}
