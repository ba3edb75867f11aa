//! # linkgate
//!
//! Resilient cache and admission-control layer for a link-shortening service.
//!
//! Redis is shared by every instance of the service, but it is never a single
//! point of failure: when it is unreachable, the cache and the rate limiter
//! keep working on a process-local store and switch back once Redis recovers.
//!
//! ## Architecture
//!
//! - **Domain Layer** ([`domain`]) - Connection state, limiter policies and decisions
//! - **Infrastructure Layer** ([`infrastructure`]) - Redis and local stores, connection lifecycle
//! - **Application Layer** ([`application`]) - Rate limiting
//! - **API Layer** ([`api`]) - Health and cache endpoints, rate limit middleware
//!
//! ## Features
//!
//! - Dual-mode cache with write-through mirroring and post-outage sync
//! - Exponential-backoff reconnects and a self-healing health probe
//! - Fixed-window rate limiting with block penalties, fail-open on store failure
//! - JSON structured logging and `metrics` counters
//!
//! ## Quick Start
//!
//! ```bash
//! export REDIS_URL="redis://localhost:6379"  # Optional, memory-only without it
//! cargo run
//! ```
//!
//! ## Configuration
//!
//! Service configuration is loaded from environment variables via [`config::Config`].
//! See [`config`] module for available options.

pub mod api;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod state;
pub mod utils;

pub mod config;
pub mod server;

pub mod routes;

pub use error::AppError;
pub use state::AppState;

/// Commonly used types for external consumers.
///
/// Re-exports frequently used types to simplify imports for library users
/// and integration tests.
pub mod prelude {
    pub use crate::application::services::RateLimiter;
    pub use crate::domain::{
        AdmissionDecision, ConnectionState, LimiterClass, LimiterPolicies, LimiterPolicy,
    };
    pub use crate::error::AppError;
    pub use crate::infrastructure::cache::{
        CacheInfrastructure, ConnectionManager, ConnectionSettings, DualModeCache,
        KeyValueStore, LocalFallbackStore,
    };
    pub use crate::infrastructure::clock::{Clock, ManualClock, SystemClock};
    pub use crate::state::AppState;
}
