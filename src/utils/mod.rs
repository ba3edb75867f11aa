//! Helper functions used across the application.
//!
//! - [`client_ip`] - Client address resolution and identifier hashing
//! - [`glob`] - Redis-style glob translation for the in-process store

pub mod client_ip;
pub mod glob;
