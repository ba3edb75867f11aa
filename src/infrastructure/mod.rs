//! Infrastructure layer for external integrations.
//!
//! # Modules
//!
//! - [`cache`] - Redis-backed cache with an in-process fallback store
//! - [`clock`] - Injectable wall-clock time source
//! - [`task`] - Cancellable background tasks

pub mod cache;
pub mod clock;
pub mod task;
