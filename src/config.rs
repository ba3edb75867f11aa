//! Application configuration loaded from environment variables.
//!
//! Configuration is loaded once at startup and validated before the server starts.
//!
//! ## Redis address
//!
//! ### Method 1: Full URL (simpler for local development)
//!
//! ```bash
//! export REDIS_URL="redis://localhost:6379/0"
//! ```
//!
//! ### Method 2: Individual components (recommended for production)
//!
//! ```bash
//! export REDIS_HOST="localhost"
//! export REDIS_PORT="6379"
//! export REDIS_PASSWORD=""
//! export REDIS_DB="0"
//! ```
//!
//! With no Redis address, or with `CACHE_ENABLED=false`, the service runs in
//! memory-only mode: the cache and rate limiter use the local store.
//!
//! ## Optional Variables
//!
//! - `LISTEN` - Bind address (default: `0.0.0.0:3000`)
//! - `RUST_LOG` - Log level (default: `info`)
//! - `LOG_FORMAT` - Log format: `text` or `json` (default: `text`)
//! - `BEHIND_PROXY` - Trust `X-Forwarded-For` / `X-Real-IP` (default: `false`)
//! - `CACHE_ENABLED` - `false` disables Redis (default: `true`)
//! - `CACHE_KEY_PREFIX` - Prefix for every key (default: `linkgate:`)
//! - `CACHE_TTL_SECONDS` - Default entry TTL, `0` = no expiry (default: 3600)
//! - `CACHE_HEALTH_CHECK_INTERVAL_SECS` (default: 30)
//! - `CACHE_MAX_RECONNECT_ATTEMPTS` (default: 5)
//! - `CACHE_BACKOFF_BASE_MS` / `CACHE_BACKOFF_CAP_MS` (default: 500 / 30000)
//! - `CACHE_OP_TIMEOUT_MS` / `CACHE_CONNECT_TIMEOUT_MS` (default: 1000 / 5000)
//! - `LOCAL_CACHE_SWEEP_INTERVAL_SECS` (default: 60)
//! - `LOCAL_CACHE_MAX_ENTRIES` (default: 100000)
//! - `RATE_LIMIT_<CLASS>_QUOTA`, `RATE_LIMIT_<CLASS>_WINDOW_SECS`,
//!   `RATE_LIMIT_<CLASS>_BLOCK_SECS` for `API`, `AUTH`, `SHORTEN`, `PASSWORD`, `BULK`

use crate::domain::{LimiterClass, LimiterPolicies, LimiterPolicy};
use crate::infrastructure::cache::{ConnectionSettings, mask_url};
use anyhow::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub log_level: String,
    pub log_format: String,
    /// When true, rate limiting reads client IP from X-Forwarded-For / X-Real-IP headers.
    /// Enable only when the service is behind a trusted reverse proxy.
    pub behind_proxy: bool,
    pub cache: CacheConfig,
    pub rate_limits: LimiterPolicies,
}

/// Cache and connection settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// `CACHE_ENABLED`; `false` keeps Redis off even when an address is set.
    pub enabled: bool,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    /// Default TTL for entries written by the HTTP layer and `cachectl`.
    pub ttl_seconds: u64,
    pub connection: ConnectionSettings,
    pub sweep_interval: Duration,
    pub max_local_entries: usize,
}

impl CacheConfig {
    /// The Redis URL to connect to, or `None` in memory-only mode.
    pub fn distributed_url(&self) -> Option<&str> {
        if self.enabled {
            self.redis_url.as_deref()
        } else {
            None
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: None,
            key_prefix: "linkgate:".to_string(),
            ttl_seconds: 3600,
            connection: ConnectionSettings::default(),
            sweep_interval: Duration::from_secs(60),
            max_local_entries: 100_000,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Unparseable numeric values fall back to their defaults.
    pub fn from_env() -> Result<Self> {
        let listen_addr = env::var("LISTEN").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
        let behind_proxy = env_flag("BEHIND_PROXY", false);

        let defaults = CacheConfig::default();
        let connection = ConnectionSettings {
            health_check_interval: Duration::from_secs(env_or(
                "CACHE_HEALTH_CHECK_INTERVAL_SECS",
                defaults.connection.health_check_interval.as_secs(),
            )),
            max_reconnect_attempts: env_or(
                "CACHE_MAX_RECONNECT_ATTEMPTS",
                defaults.connection.max_reconnect_attempts,
            ),
            backoff_base: Duration::from_millis(env_or(
                "CACHE_BACKOFF_BASE_MS",
                defaults.connection.backoff_base.as_millis() as u64,
            )),
            backoff_cap: Duration::from_millis(env_or(
                "CACHE_BACKOFF_CAP_MS",
                defaults.connection.backoff_cap.as_millis() as u64,
            )),
            op_timeout: Duration::from_millis(env_or(
                "CACHE_OP_TIMEOUT_MS",
                defaults.connection.op_timeout.as_millis() as u64,
            )),
            connect_timeout: Duration::from_millis(env_or(
                "CACHE_CONNECT_TIMEOUT_MS",
                defaults.connection.connect_timeout.as_millis() as u64,
            )),
        };

        let cache = CacheConfig {
            enabled: env_flag("CACHE_ENABLED", defaults.enabled),
            redis_url: Self::load_redis_url(),
            key_prefix: env::var("CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            ttl_seconds: env_or("CACHE_TTL_SECONDS", defaults.ttl_seconds),
            connection,
            sweep_interval: Duration::from_secs(env_or(
                "LOCAL_CACHE_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            max_local_entries: env_or("LOCAL_CACHE_MAX_ENTRIES", defaults.max_local_entries),
        };

        Ok(Self {
            listen_addr,
            log_level,
            log_format,
            behind_proxy,
            cache,
            rate_limits: Self::load_rate_limits(),
        })
    }

    /// Loads Redis URL with fallback to component-based configuration.
    ///
    /// Priority:
    /// 1. `REDIS_URL` environment variable
    /// 2. Constructed from `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`, `REDIS_DB`
    ///
    /// Returns `None` if Redis is not configured.
    fn load_redis_url() -> Option<String> {
        if let Ok(url) = env::var("REDIS_URL") {
            return Some(url);
        }

        let host = env::var("REDIS_HOST").ok()?;
        let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
        let password = env::var("REDIS_PASSWORD").ok();
        let db = env::var("REDIS_DB").unwrap_or_else(|_| "0".to_string());

        let url = match password {
            // Empty password means no authentication
            Some(pwd) if !pwd.is_empty() => format!("redis://:{}@{}:{}/{}", pwd, host, port, db),
            _ => format!("redis://{}:{}/{}", host, port, db),
        };

        Some(url)
    }

    /// Built-in policies overridden by `RATE_LIMIT_<CLASS>_*` variables.
    fn load_rate_limits() -> LimiterPolicies {
        let mut policies = LimiterPolicies::default();

        for class in LimiterClass::ALL {
            let name = class.as_str().to_ascii_uppercase();
            let current = *policies.get(class);

            *policies.get_mut(class) = LimiterPolicy::new(
                env_or(&format!("RATE_LIMIT_{}_QUOTA", name), current.quota),
                env_or(
                    &format!("RATE_LIMIT_{}_WINDOW_SECS", name),
                    current.window_seconds,
                ),
                env_or(
                    &format!("RATE_LIMIT_{}_BLOCK_SECS", name),
                    current.block_duration_seconds,
                ),
            );
        }

        policies
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `log_format` is not `text` or `json`
    /// - `listen_addr` is invalid
    /// - the Redis URL has an unsupported scheme
    /// - a timing or capacity setting is zero
    /// - a rate limit window is zero
    pub fn validate(&self) -> Result<()> {
        if self.log_format != "text" && self.log_format != "json" {
            anyhow::bail!(
                "LOG_FORMAT must be 'text' or 'json', got '{}'",
                self.log_format
            );
        }

        if !self.listen_addr.contains(':') {
            anyhow::bail!(
                "LISTEN must be in format 'host:port', got '{}'",
                self.listen_addr
            );
        }

        if let Some(ref redis_url) = self.cache.redis_url
            && !redis_url.starts_with("redis://")
            && !redis_url.starts_with("rediss://")
        {
            anyhow::bail!(
                "REDIS_URL must start with 'redis://' or 'rediss://', got '{}'",
                mask_url(redis_url)
            );
        }

        let conn = &self.cache.connection;
        if conn.max_reconnect_attempts == 0 {
            anyhow::bail!("CACHE_MAX_RECONNECT_ATTEMPTS must be at least 1");
        }
        if conn.backoff_base.is_zero() || conn.backoff_cap < conn.backoff_base {
            anyhow::bail!(
                "CACHE_BACKOFF_BASE_MS must be > 0 and not exceed CACHE_BACKOFF_CAP_MS, got {:?} / {:?}",
                conn.backoff_base,
                conn.backoff_cap
            );
        }
        if conn.op_timeout.is_zero() || conn.connect_timeout.is_zero() {
            anyhow::bail!("CACHE_OP_TIMEOUT_MS and CACHE_CONNECT_TIMEOUT_MS must be greater than 0");
        }
        if conn.health_check_interval.is_zero() {
            anyhow::bail!("CACHE_HEALTH_CHECK_INTERVAL_SECS must be greater than 0");
        }

        if self.cache.sweep_interval.is_zero() {
            anyhow::bail!("LOCAL_CACHE_SWEEP_INTERVAL_SECS must be greater than 0");
        }
        if self.cache.max_local_entries == 0 {
            anyhow::bail!("LOCAL_CACHE_MAX_ENTRIES must be at least 1");
        }

        for class in LimiterClass::ALL {
            if self.rate_limits.get(class).window_seconds == 0 {
                anyhow::bail!(
                    "RATE_LIMIT_{}_WINDOW_SECS must be greater than 0",
                    class.as_str().to_ascii_uppercase()
                );
            }
        }

        Ok(())
    }

    /// Returns whether the service will try to use Redis.
    pub fn is_cache_enabled(&self) -> bool {
        self.cache.distributed_url().is_some()
    }

    /// Prints configuration summary (without sensitive data).
    pub fn print_summary(&self) {
        tracing::info!("Configuration loaded:");
        tracing::info!("  Listen address: {}", self.listen_addr);

        match (&self.cache.redis_url, self.cache.enabled) {
            (Some(url), true) => tracing::info!("  Redis: {} (enabled)", mask_url(url)),
            (Some(url), false) => {
                tracing::info!("  Redis: {} (disabled by CACHE_ENABLED)", mask_url(url))
            }
            (None, _) => tracing::info!("  Redis: not configured (memory-only)"),
        }

        tracing::info!("  Key prefix: {}", self.cache.key_prefix);
        tracing::info!("  Local store capacity: {}", self.cache.max_local_entries);
        tracing::info!("  Log level: {}", self.log_level);
        tracing::info!("  Log format: {}", self.log_format);

        for class in LimiterClass::ALL {
            let policy = self.rate_limits.get(class);
            tracing::info!(
                "  Rate limit {}: {} per {}s, block {}s",
                class,
                policy.quota,
                policy.window_seconds,
                policy.effective_block_seconds()
            );
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

/// Loads and validates configuration from environment variables.
///
/// # Errors
///
/// Returns an error if validation fails.
///
/// # Note
///
/// This function expects environment variables to be already loaded
/// (e.g., via `dotenvy::dotenv()` in `main.rs`).
pub fn load_from_env() -> Result<Config> {
    let config = Config::from_env()?;
    config.validate()?;
    Ok(config)
}
