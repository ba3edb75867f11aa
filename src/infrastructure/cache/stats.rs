//! Per-namespace hit/miss accounting.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Hit/miss totals for one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub hits: u64,
    pub misses: u64,
}

impl NamespaceStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Point-in-time copy of all namespace counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

impl CacheStats {
    pub fn namespace(&self, name: &str) -> NamespaceStats {
        self.namespaces.get(name).copied().unwrap_or_default()
    }
}

/// Lock-free recorder behind [`crate::infrastructure::cache::DualModeCache::stats`].
///
/// Each read is counted twice: in process-local atomics for the health
/// endpoint, and through the `metrics` facade as `cache_hits_total` /
/// `cache_misses_total` labelled by namespace. Neither can fail or block.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    counters: DashMap<String, Counters>,
}

impl StatsRecorder {
    pub fn record(&self, namespace: &str, hit: bool) {
        if let Some(counters) = self.counters.get(namespace) {
            Self::bump(&counters, hit);
        } else {
            let counters = self.counters.entry(namespace.to_string()).or_default();
            Self::bump(&counters, hit);
        }

        if hit {
            metrics::counter!("cache_hits_total", "namespace" => namespace.to_string()).increment(1);
        } else {
            metrics::counter!("cache_misses_total", "namespace" => namespace.to_string())
                .increment(1);
        }
    }

    fn bump(counters: &Counters, hit: bool) {
        if hit {
            counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CacheStats {
        let namespaces = self
            .counters
            .iter()
            .map(|entry| {
                let stats = NamespaceStats {
                    hits: entry.hits.load(Ordering::Relaxed),
                    misses: entry.misses.load(Ordering::Relaxed),
                };
                (entry.key().clone(), stats)
            })
            .collect();

        CacheStats { namespaces }
    }
}
