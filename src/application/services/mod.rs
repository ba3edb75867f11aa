//! Application services built on top of the cache infrastructure.

pub mod rate_limiter;

pub use rate_limiter::RateLimiter;
