//! Application layer.
//!
//! Request-facing logic that composes infrastructure components. Currently
//! this is admission control: [`services::RateLimiter`] decides whether a
//! caller may proceed, using the same connection state and stores as the
//! cache.

pub mod services;
