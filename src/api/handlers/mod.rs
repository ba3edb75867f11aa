//! HTTP request handlers.

pub mod cache;
pub mod health;

pub use cache::cache_stats_handler;
pub use health::health_handler;
