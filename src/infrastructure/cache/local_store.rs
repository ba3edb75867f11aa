//! In-process expiring key/value store used when Redis is unavailable.

use super::service::{CacheError, CacheResult, KeyValueStore};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::task::{BackgroundTask, shutdown_requested};
use crate::utils::glob::glob_to_regex;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct LocalEntry {
    value: String,
    /// Absolute expiry in clock milliseconds; `None` never expires.
    expires_at: Option<i64>,
}

impl LocalEntry {
    fn new(value: String, ttl: Option<Duration>, now: i64) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now.saturating_add(ttl.as_millis() as i64)),
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local cache store with TTL enforcement.
///
/// Mirrors the subset of Redis semantics the cache and rate limiter rely on.
/// Expired entries are never returned: reads check expiry against the injected
/// [`Clock`], and an optional background sweeper removes them in bulk.
///
/// # Concurrency
///
/// Entries live in a [`DashMap`]. Read-modify-write operations
/// ([`KeyValueStore::incr_with_expiry`], [`KeyValueStore::expire`]) run inside the
/// key's shard lock, so concurrent increments of one key are never lost.
///
/// # Capacity
///
/// When `max_entries` is reached, expired entries are swept first; if that
/// frees less than a tenth of the capacity, the soonest-expiring entries are
/// evicted down to that mark in one pass.
pub struct LocalFallbackStore {
    entries: DashMap<String, LocalEntry>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    sweeper: Mutex<Option<BackgroundTask>>,
}

impl LocalFallbackStore {
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            max_entries: max_entries.max(1),
            sweeper: Mutex::new(None),
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every expired entry. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Starts the periodic sweeper. Calling it again while running is a no-op.
    pub async fn start_sweeper(self: &Arc<Self>, every: Duration) {
        let mut slot = self.sweeper.lock().await;
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let store: Weak<Self> = Arc::downgrade(self);
        *slot = Some(BackgroundTask::spawn(
            "local-cache-sweeper",
            move |mut shutdown| async move {
                let mut interval = tokio::time::interval(every);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                interval.tick().await;

                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break,
                        _ = interval.tick() => {
                            let Some(store) = store.upgrade() else { break };
                            let removed = store.sweep_expired();
                            if removed > 0 {
                                debug!(removed, remaining = store.len(), "Local cache sweep");
                            }
                        }
                    }
                }
            },
        ));
        info!(interval_secs = every.as_secs(), "Local cache sweeper started");
    }

    /// Stops the sweeper and waits for it to exit.
    pub async fn stop_sweeper(&self) {
        let task = self.sweeper.lock().await.take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    /// Entries evicted per pass once the store is full of live entries.
    fn eviction_batch(&self) -> usize {
        (self.max_entries / 10).max(1)
    }

    fn make_room(&self, key: &str) {
        if self.entries.len() < self.max_entries || self.entries.contains_key(key) {
            return;
        }

        // Sweeping and eviction both free at least a batch, so the O(n) scan
        // runs at most once per `eviction_batch` inserts
        let target = self.max_entries.saturating_sub(self.eviction_batch());
        if self.sweep_expired() > 0 && self.entries.len() <= target {
            return;
        }

        let excess = self.entries.len().saturating_sub(target);
        if excess == 0 {
            return;
        }

        let mut candidates: Vec<(i64, String)> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.value().expires_at.unwrap_or(i64::MAX),
                    entry.key().clone(),
                )
            })
            .collect();

        if excess < candidates.len() {
            candidates.select_nth_unstable(excess - 1);
            candidates.truncate(excess);
        }

        for (_, victim) in &candidates {
            self.entries.remove(victim);
        }
        debug!(evicted = candidates.len(), remaining = self.entries.len(), "Local store full, evicted soonest-expiring entries");
    }
}

#[async_trait]
impl KeyValueStore for LocalFallbackStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = self.clock.now_millis();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.make_room(key);
        let entry = LocalEntry::new(value.to_string(), ttl, self.clock.now_millis());
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let matcher = glob_to_regex(pattern).map_err(|e| {
            CacheError::Operation(format!("Invalid key pattern '{}': {}", pattern, e))
        })?;

        let before = self.entries.len();
        self.entries.retain(|key, _| !matcher.is_match(key));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let now = self.clock.now_millis();
        self.make_room(key);

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(LocalEntry::new("1".to_string(), Some(ttl), now));
                    return Ok(1);
                }

                let current: i64 = occupied.get().value.parse().map_err(|_| {
                    CacheError::Operation(format!("Value at '{}' is not an integer", key))
                })?;
                let next = current.saturating_add(1);
                occupied.get_mut().value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LocalEntry::new("1".to_string(), Some(ttl), now));
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = self.clock.now_millis();

        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now.saturating_add(ttl.as_millis() as i64));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = self.clock.now_millis();

        Ok(self.entries.get(key).and_then(|entry| match entry.expires_at {
            Some(at) if at > now => Some(Duration::from_millis((at - now) as u64)),
            _ => None,
        }))
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
