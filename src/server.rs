//! HTTP server initialization and runtime setup.
//!
//! Builds the cache infrastructure and rate limiter, serves the router, and
//! tears the background tasks down after a shutdown signal.

use crate::application::services::RateLimiter;
use crate::config::Config;
use crate::infrastructure::cache::CacheInfrastructure;
use crate::routes::app_router;
use crate::state::AppState;

use anyhow::{Context, Result};
use axum::ServiceExt;
use axum::extract::Request;
use std::net::SocketAddr;
use std::sync::Arc;

/// Runs the HTTP server with the given configuration.
///
/// Initializes:
/// - Local fallback store and its sweeper
/// - Redis connection cycle (in the background; startup never waits for Redis)
/// - Rate limiter
/// - Axum HTTP server with graceful shutdown
///
/// # Errors
///
/// Returns an error if:
/// - Redis is enabled with an invalid URL
/// - Server bind fails
/// - Server runtime error occurs
pub async fn run(config: Config) -> Result<()> {
    let infra = CacheInfrastructure::init(&config.cache)
        .await
        .context("Failed to initialize cache")?;

    let limiter = Arc::new(build_rate_limiter(&config, &infra));
    let state = AppState::new(&infra, limiter, config.behind_proxy);
    let app = app_router(state);

    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr}");

    let served = axum::serve(
        listener,
        ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    infra.shutdown().await;
    served?;

    Ok(())
}

/// Rate limiter sharing the connection and local store of `infra`.
pub fn build_rate_limiter(config: &Config, infra: &CacheInfrastructure) -> RateLimiter {
    RateLimiter::new(
        infra.connection.clone(),
        infra.limiter_local.clone(),
        infra.clock.clone(),
        config.rate_limits.clone(),
        infra.key_prefix.clone(),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
