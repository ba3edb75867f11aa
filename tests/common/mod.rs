#![allow(dead_code)]

use async_trait::async_trait;
use linkgate::application::services::RateLimiter;
use linkgate::domain::{ConnectionState, LimiterPolicies};
use linkgate::infrastructure::cache::{
    CacheError, CacheInfrastructure, CacheResult, ConnectionSettings, KeyValueStore,
    LocalFallbackStore, StoreConnector,
};
use linkgate::infrastructure::clock::ManualClock;
use linkgate::state::AppState;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

pub const START_MILLIS: i64 = 1_700_000_000_000;
pub const PREFIX: &str = "test:";

/// Stand-in for Redis: a separate in-memory keyspace that can be switched off.
///
/// While unavailable every call fails with a transport error, like a dropped
/// connection.
pub struct FakeRedis {
    inner: LocalFallbackStore,
    available: AtomicBool,
    rejecting_writes: AtomicBool,
}

impl FakeRedis {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalFallbackStore::new(clock, 100_000),
            available: AtomicBool::new(true),
            rejecting_writes: AtomicBool::new(false),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes `set` fail the way a Redis at its memory limit does, while the
    /// connection itself stays healthy.
    pub fn set_rejecting_writes(&self, rejecting: bool) {
        self.rejecting_writes.store(rejecting, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Reads the keyspace regardless of availability.
    pub async fn peek(&self, key: &str) -> Option<String> {
        self.inner.get(key).await.unwrap()
    }

    /// Writes the keyspace regardless of availability.
    pub async fn poke(&self, key: &str, value: &str) {
        self.inner.set(key, value, None).await.unwrap();
    }

    fn check(&self) -> CacheResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(CacheError::Transport("connection refused".into()))
        }
    }
}

#[async_trait]
impl KeyValueStore for FakeRedis {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.check()?;
        if self.rejecting_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Operation(
                "OOM command not allowed when used memory > 'maxmemory'".into(),
            ));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.check()?;
        self.inner.delete_pattern(pattern).await
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        self.check()?;
        self.inner.incr_with_expiry(key, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.check()?;
        self.inner.ttl(key).await
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check()
    }

    fn backend_name(&self) -> &'static str {
        "fake-redis"
    }
}

/// Hands out the shared [`FakeRedis`] while it is available.
pub struct FakeConnector {
    redis: Arc<FakeRedis>,
    pub attempts: AtomicU32,
}

impl FakeConnector {
    pub fn new(redis: Arc<FakeRedis>) -> Arc<Self> {
        Arc::new(Self {
            redis,
            attempts: AtomicU32::new(0),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for FakeConnector {
    async fn connect(&self) -> CacheResult<Arc<dyn KeyValueStore>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.redis.check()?;
        let store: Arc<dyn KeyValueStore> = self.redis.clone();
        Ok(store)
    }

    fn describe(&self) -> String {
        "fake://redis".to_string()
    }
}

/// Short backoff, and a probe interval long enough that it never fires on
/// its own during a test; tests call `probe()` explicitly.
pub fn test_settings() -> ConnectionSettings {
    ConnectionSettings {
        health_check_interval: Duration::from_secs(3600),
        max_reconnect_attempts: 2,
        backoff_base: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(20),
        op_timeout: Duration::from_millis(500),
        connect_timeout: Duration::from_millis(500),
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub redis: Arc<FakeRedis>,
    pub connector: Arc<FakeConnector>,
    pub infra: CacheInfrastructure,
    pub limiter: Arc<RateLimiter>,
}

impl Harness {
    /// Builds the stack against a [`FakeRedis`] without connecting.
    pub fn new(policies: LimiterPolicies) -> Self {
        Self::with_capacity(policies, 10_000)
    }

    /// Like [`Harness::new`], with a custom local store capacity.
    pub fn with_capacity(policies: LimiterPolicies, max_local_entries: usize) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let redis = FakeRedis::new(clock.clone());
        let connector = FakeConnector::new(redis.clone());

        let infra = CacheInfrastructure::from_parts(
            Some(connector.clone() as Arc<dyn StoreConnector>),
            test_settings(),
            clock.clone(),
            PREFIX,
            max_local_entries,
        );
        let limiter = Arc::new(build_limiter(&infra, policies));

        Self {
            clock,
            redis,
            connector,
            infra,
            limiter,
        }
    }

    /// Connected to a healthy [`FakeRedis`].
    pub async fn connected(policies: LimiterPolicies) -> Self {
        let harness = Self::new(policies);
        harness.infra.connection.connect().await;
        assert_eq!(harness.state(), ConnectionState::Connected);
        harness
    }

    /// Redis unreachable from the start; connect attempts exhausted.
    pub async fn unreachable(policies: LimiterPolicies) -> Self {
        let harness = Self::new(policies);
        harness.redis.set_available(false);
        harness.infra.connection.connect().await;
        assert_eq!(harness.state(), ConnectionState::Degraded);
        harness
    }

    /// Redis disabled by configuration.
    pub fn memory_only(policies: LimiterPolicies) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let redis = FakeRedis::new(clock.clone());
        let connector = FakeConnector::new(redis.clone());

        let infra =
            CacheInfrastructure::from_parts(None, test_settings(), clock.clone(), PREFIX, 10_000);
        let limiter = Arc::new(build_limiter(&infra, policies));

        Self {
            clock,
            redis,
            connector,
            infra,
            limiter,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.infra.connection.state()
    }

    /// Takes Redis down and lets the manager notice, as the health probe would.
    pub async fn outage(&self) {
        self.redis.set_available(false);
        assert!(!self.infra.connection.probe().await);
        assert_eq!(self.state(), ConnectionState::Degraded);
    }

    /// Brings Redis back and lets the probe promote the connection.
    pub async fn recover(&self) {
        self.redis.set_available(true);
        assert!(self.infra.connection.probe().await);
        assert_eq!(self.state(), ConnectionState::Connected);
    }

    pub fn app_state(&self, behind_proxy: bool) -> AppState {
        AppState::new(&self.infra, self.limiter.clone(), behind_proxy)
    }

    pub async fn shutdown(&self) {
        self.infra.shutdown().await;
    }
}

pub fn build_limiter(infra: &CacheInfrastructure, policies: LimiterPolicies) -> RateLimiter {
    RateLimiter::new(
        infra.connection.clone(),
        infra.limiter_local.clone(),
        infra.clock.clone(),
        policies,
        infra.key_prefix.clone(),
    )
}

pub fn full_key(namespace: &str, key: &str) -> String {
    format!("{}{}:{}", PREFIX, namespace, key)
}
