//! Rate limiting middleware backed by [`RateLimiter`].

use crate::application::services::RateLimiter;
use crate::domain::LimiterClass;
use crate::error::AppError;
use crate::state::AppState;
use crate::utils::client_ip::{client_ip, hash_identifier};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Header carrying the quota left in the current window.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Limiter and class applied by one [`layer`] instance.
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    class: LimiterClass,
    behind_proxy: bool,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, class: LimiterClass, behind_proxy: bool) -> Self {
        Self {
            limiter,
            class,
            behind_proxy,
        }
    }

    /// Limits `class` using the limiter and proxy setting from `state`.
    pub fn for_class(state: &AppState, class: LimiterClass) -> Self {
        Self::new(state.limiter.clone(), class, state.behind_proxy)
    }
}

/// Admits or rejects a request per client address.
///
/// # Key Extraction
///
/// The client address comes from the socket peer, or from `X-Forwarded-For` /
/// `X-Real-IP` when running behind a proxy. It is hashed before use, so raw
/// addresses never appear in the cache keyspace. Requests with no resolvable
/// address pass through unlimited.
///
/// # Responses
///
/// - Allowed: the inner response plus `X-RateLimit-Remaining`
/// - Denied: `429 Too Many Requests` with `Retry-After` and
///   `X-RateLimit-Remaining: 0`
///
/// # Example
///
/// ```rust,ignore
/// let api = Router::new()
///     .route("/cache/stats", get(cache_stats_handler))
///     .route_layer(middleware::from_fn_with_state(
///         RateLimitState::for_class(&state, LimiterClass::Api),
///         rate_limit::layer,
///     ));
/// ```
pub async fn layer(State(st): State<RateLimitState>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let Some(ip) = client_ip(req.headers(), peer, st.behind_proxy) else {
        tracing::debug!(class = %st.class, "No client address, skipping rate limit");
        return next.run(req).await;
    };

    let decision = st.limiter.check(st.class, &hash_identifier(&ip)).await;

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        tracing::info!(
            class = %st.class,
            retry_after = decision.retry_after_seconds,
            "Rate limit exceeded"
        );
        AppError::too_many_requests(decision.retry_after_seconds).into_response()
    };

    response
        .headers_mut()
        .insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    response
}
