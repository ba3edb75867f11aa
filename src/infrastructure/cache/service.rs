//! Store primitives shared by both cache backends, and cache error types.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Errors that can occur while talking to a cache backend.
///
/// None of these reach callers of [`crate::infrastructure::cache::DualModeCache`] or
/// [`crate::application::services::RateLimiter`]: transport failures reroute to the
/// local store, serialization failures become misses.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Network or protocol failure talking to the distributed store.
    #[error("Cache transport error: {0}")]
    Transport(String),

    /// A distributed-store call exceeded its deadline.
    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    /// A stored payload could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or invalid distributed-store settings.
    #[error("Cache configuration error: {0}")]
    Configuration(String),

    /// The store rejected an operation on a key (e.g. INCR on a non-integer).
    #[error("Cache operation error: {0}")]
    Operation(String),
}

impl CacheError {
    /// Whether this error means the distributed store is unreachable or unhealthy.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_timeout()
            || e.is_connection_dropped()
            || e.is_connection_refusal()
        {
            Self::Transport(e.to_string())
        } else {
            Self::Operation(e.to_string())
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Primitive key/value operations every cache backend must supply.
///
/// Both the distributed store and the local fallback store implement this
/// trait, so the cache and the rate limiter run the same logic on either.
///
/// # Atomicity
///
/// [`KeyValueStore::incr_with_expiry`] must be atomic as observed by concurrent
/// callers: two simultaneous increments of the same key both count. Redis gets
/// this from a server-side script; the in-process store holds the per-key entry
/// lock across the read-modify-write.
///
/// # Implementations
///
/// - [`crate::infrastructure::cache::RedisStore`] - Redis-backed, shared across processes
/// - [`crate::infrastructure::cache::LocalFallbackStore`] - In-process expiring map
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the raw value stored at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores `value` at `key`. `ttl = None` means the entry never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Removes `key`. Returns `true` if something was deleted.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Removes every key matching a Redis-style glob. Returns the number deleted.
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    /// Atomically increments the integer at `key` and returns the new value.
    ///
    /// When the increment creates the key, it expires after `ttl`; an existing
    /// key keeps its current expiry.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64>;

    /// Resets the expiry of an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remaining time to live, `None` if the key is absent or never expires.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    /// Lightweight liveness check.
    async fn ping(&self) -> CacheResult<()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Opens connections to the distributed store.
///
/// Separated from [`KeyValueStore`] so the connection manager can retry
/// connection establishment without knowing the concrete backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Establishes a connection and verifies it with a liveness check.
    async fn connect(&self) -> CacheResult<Arc<dyn KeyValueStore>>;

    /// Human-readable target (credentials masked) for logs.
    fn describe(&self) -> String;
}
