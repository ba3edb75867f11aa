mod common;

use axum::http::StatusCode;
use axum::{Router, routing::get};
use axum_test::TestServer;
use common::Harness;
use linkgate::api::handlers::health_handler;
use linkgate::domain::LimiterPolicies;

fn health_app(h: &Harness) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(h.app_state(false))
}

#[tokio::test]
async fn test_health_connected() {
    let h = Harness::connected(LimiterPolicies::default()).await;
    let server = TestServer::new(health_app(&h)).unwrap();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let json = response.json::<serde_json::Value>();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["checks"]["distributed_cache"]["state"], "connected");
    assert_eq!(json["checks"]["distributed_cache"]["enabled"], true);

    h.shutdown().await;
}

#[tokio::test]
async fn test_health_memory_only_is_healthy() {
    let h = Harness::memory_only(LimiterPolicies::default());
    let server = TestServer::new(health_app(&h)).unwrap();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let json = response.json::<serde_json::Value>();
    assert_eq!(json["checks"]["distributed_cache"]["enabled"], false);
    assert_eq!(json["checks"]["local_cache"]["status"], "ok");
}

#[tokio::test]
async fn test_health_degraded_returns_503() {
    let h = Harness::connected(LimiterPolicies::default()).await;
    h.infra.cache.set("links", "k", &1u32, 0).await;
    h.outage().await;

    let server = TestServer::new(health_app(&h)).unwrap();
    let response = server.get("/health").expect_failure().await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let json = response.json::<serde_json::Value>();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["distributed_cache"]["state"], "degraded");
    assert_eq!(json["checks"]["local_cache"]["entries"], 1);

    h.shutdown().await;
}

#[tokio::test]
async fn test_health_endpoint_structure() {
    let h = Harness::memory_only(LimiterPolicies::default());
    let server = TestServer::new(health_app(&h)).unwrap();

    let json = server.get("/health").await.json::<serde_json::Value>();

    assert!(json.get("status").is_some());
    assert!(json.get("version").is_some());
    assert!(json["checks"].get("distributed_cache").is_some());
    assert!(json["checks"].get("local_cache").is_some());
}
