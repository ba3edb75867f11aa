//! API route configuration.
//!
//! Every route here is limited by the `api` limiter class.

use crate::api::handlers::cache_stats_handler;
use crate::api::middleware::rate_limit::{self, RateLimitState};
use crate::domain::LimiterClass;
use crate::state::AppState;
use axum::{Router, middleware, routing::get};

/// API routes under `/api`.
///
/// # Endpoints
///
/// - `GET /cache/stats` - Cache hit/miss counters and backend state
pub fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/cache/stats", get(cache_stats_handler))
        .route_layer(middleware::from_fn_with_state(
            RateLimitState::for_class(state, LimiterClass::Api),
            rate_limit::layer,
        ))
}
