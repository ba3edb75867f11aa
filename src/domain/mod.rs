//! Domain layer: types shared by the cache and the rate limiter.
//!
//! Nothing here talks to a backend; these are plain values read and written
//! by the infrastructure and application layers.
//!
//! - [`connection`] - State of the distributed-store connection
//! - [`rate_limit`] - Limiter classes, policies and admission decisions

pub mod connection;
pub mod rate_limit;

pub use connection::ConnectionState;
pub use rate_limit::{AdmissionDecision, LimiterClass, LimiterPolicies, LimiterPolicy};
