mod common;

use async_trait::async_trait;
use common::{FakeConnector, FakeRedis};
use linkgate::domain::ConnectionState;
use linkgate::infrastructure::cache::{
    CacheResult, ConnectionManager, ConnectionSettings, KeyValueStore, StoreConnector,
};
use linkgate::infrastructure::clock::ManualClock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Connector whose connection attempts take a long time to succeed.
struct SlowConnector {
    redis: Arc<FakeRedis>,
    delay: Duration,
    attempts: AtomicU32,
}

#[async_trait]
impl StoreConnector for SlowConnector {
    async fn connect(&self) -> CacheResult<Arc<dyn KeyValueStore>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let store: Arc<dyn KeyValueStore> = self.redis.clone();
        Ok(store)
    }

    fn describe(&self) -> String {
        "slow://redis".to_string()
    }
}

fn settings() -> ConnectionSettings {
    ConnectionSettings {
        health_check_interval: Duration::from_secs(5),
        max_reconnect_attempts: 3,
        backoff_base: Duration::from_millis(100),
        backoff_cap: Duration::from_millis(400),
        op_timeout: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(60),
    }
}

fn fake_redis() -> Arc<FakeRedis> {
    FakeRedis::new(Arc::new(ManualClock::new(common::START_MILLIS)))
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_abandons_in_flight_connect() {
    let connector = Arc::new(SlowConnector {
        redis: fake_redis(),
        delay: Duration::from_secs(30),
        attempts: AtomicU32::new(0),
    });
    let manager = Arc::new(ConnectionManager::new(connector.clone(), settings()));

    manager.start().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.state(), ConnectionState::Connecting);

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // Long after the slow attempt would have finished, nothing was installed
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.active_store().await.is_none());
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_transient_failures() {
    let redis = fake_redis();
    let connector = FakeConnector::new(redis.clone());
    let manager = Arc::new(ConnectionManager::new(connector.clone(), settings()));
    let mut states = manager.subscribe();

    redis.set_available(false);
    manager.start().await;

    // First attempt fails, then the manager reports Reconnecting
    states
        .wait_for(|s| *s == ConnectionState::Reconnecting)
        .await
        .unwrap();

    redis.set_available(true);
    states
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();
    assert!(connector.attempts() >= 2);

    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_explicit_connect_leaves_exhausted_degraded_mode() {
    let redis = fake_redis();
    let connector = FakeConnector::new(redis.clone());
    let manager = Arc::new(ConnectionManager::new(connector.clone(), settings()));

    redis.set_available(false);
    manager.connect().await;
    assert_eq!(manager.state(), ConnectionState::Degraded);
    assert_eq!(connector.attempts(), 3);

    redis.set_available(true);
    manager.connect().await;
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_health_probe_degrades_and_heals() {
    let redis = fake_redis();
    let connector = FakeConnector::new(redis.clone());
    let manager = Arc::new(ConnectionManager::new(connector, settings()));

    manager.connect().await;
    assert_eq!(manager.state(), ConnectionState::Connected);

    redis.set_available(false);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(manager.state(), ConnectionState::Degraded);

    redis.set_available(true);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.epoch(), 2);

    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let manager = Arc::new(ConnectionManager::new(
        FakeConnector::new(fake_redis()),
        settings(),
    ));

    manager.disconnect().await;
    manager.connect().await;
    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
}
