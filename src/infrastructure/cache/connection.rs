//! Lifecycle management for the distributed-store connection.
//!
//! [`ConnectionManager`] owns the only handle to the distributed store. It
//! connects with exponential backoff, probes liveness on a fixed interval, and
//! publishes a [`ConnectionState`] that the cache and rate limiter use to pick
//! a backend. No method returns an error: every transport failure becomes a
//! state transition plus a log event.

use super::routing::{Backend, route_decision};
use super::service::{CacheError, CacheResult, KeyValueStore, StoreConnector};
use crate::domain::ConnectionState;
use crate::infrastructure::task::shutdown_requested;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

/// Timing and retry parameters for [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Period of the liveness probe.
    pub health_check_interval: Duration,
    /// Connection attempts per connect cycle, including the first.
    pub max_reconnect_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub backoff_base: Duration,
    /// Upper bound for a single backoff delay.
    pub backoff_cap: Duration,
    /// Deadline for every store operation issued through [`ConnectionManager::guarded`].
    pub op_timeout: Duration,
    /// Deadline for a single connection attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            op_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Delays slept between connection attempts.
///
/// `base, 2*base, 4*base, ...` capped at `backoff_cap`, one entry fewer than
/// `max_reconnect_attempts`. The base is rounded down to an even millisecond
/// count because the strategy doubles from a seed of 2.
pub fn backoff_delays(settings: &ConnectionSettings) -> impl Iterator<Item = Duration> + use<> {
    let base_ms = (settings.backoff_base.as_millis() as u64).max(2);

    ExponentialBackoff::from_millis(2)
        .factor(base_ms / 2)
        .max_delay(settings.backoff_cap)
        .take(settings.max_reconnect_attempts.saturating_sub(1) as usize)
}

/// One connect cycle and the tasks it spawned, sharing a shutdown signal.
struct Session {
    id: u64,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the distributed-store connection and its state machine.
///
/// # State machine
///
/// ```text
/// Disconnected --connect--> Connecting --ok--> Connected <--probe ok-- Degraded
///                               |                  |                      ^
///                               +--fail--> Reconnecting --ok--+           |
///                                              |   Connected --probe fail / op error
///                                              +--exhausted--> Degraded (no handle)
/// any --disconnect--> Disconnected
/// ```
///
/// Every transition into `Connected` advances a connection epoch that the
/// cache uses to push writes made on the local store back to Redis.
///
/// Create one instance per process (see
/// [`crate::infrastructure::cache::CacheInfrastructure`]) and share it via `Arc`.
pub struct ConnectionManager {
    connector: Option<Arc<dyn StoreConnector>>,
    settings: ConnectionSettings,
    state: AtomicU8,
    epoch: AtomicU64,
    next_session: AtomicU64,
    store: RwLock<Option<Arc<dyn KeyValueStore>>>,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    /// Creates a manager for `connector`. Nothing connects until
    /// [`Self::start`] or [`Self::connect`] is called.
    pub fn new(connector: Arc<dyn StoreConnector>, settings: ConnectionSettings) -> Self {
        Self::build(Some(connector), settings)
    }

    /// Creates a manager that never connects (memory-only mode).
    pub fn disabled(settings: ConnectionSettings) -> Self {
        Self::build(None, settings)
    }

    fn build(connector: Option<Arc<dyn StoreConnector>>, settings: ConnectionSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            settings,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            epoch: AtomicU64::new(0),
            next_session: AtomicU64::new(0),
            store: RwLock::new(None),
            state_tx,
            session: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.connector.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    /// Number of transitions into `Connected` so far.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Receives every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The distributed store, if the current state routes traffic to it.
    pub async fn active_store(&self) -> Option<Arc<dyn KeyValueStore>> {
        match route_decision(self.state()) {
            Backend::Distributed => self.store.read().await.clone(),
            Backend::Local => None,
        }
    }

    /// Starts a connect cycle in the background and returns immediately.
    ///
    /// Same idempotency rules as [`Self::connect`]. The spawned cycle is
    /// joined by [`Self::disconnect`].
    pub async fn start(self: &Arc<Self>) {
        let Some((id, shutdown)) = self.open_session().await else {
            return;
        };

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.run_connect_cycle(id, shutdown).await });

        // If the session is already gone, the cycle sees the closed channel and exits
        if let Some(session) = self.session.lock().await.as_mut().filter(|s| s.id == id) {
            session.tasks.push(handle);
        }
    }

    /// Runs a connect cycle to completion.
    ///
    /// Returns immediately when the store is disabled, or when a cycle is
    /// running or has succeeded. Starts a new cycle from `Disconnected` or
    /// from the exhausted `Degraded` state. Ends `Connected`, or `Degraded`
    /// once every attempt failed, or untouched if [`Self::disconnect`] ran
    /// concurrently.
    pub async fn connect(self: &Arc<Self>) {
        if let Some((id, shutdown)) = self.open_session().await {
            self.run_connect_cycle(id, shutdown).await;
        }
    }

    /// Closes the connection and cancels the retry loop and health probe.
    ///
    /// Idempotent. When this returns, no task spawned by this manager is
    /// still running and the state is `Disconnected`.
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();

        if let Some(session) = session {
            let _ = session.shutdown.send(true);
            for task in session.tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Connection task ended abnormally");
                }
            }
        }

        let had_store = self.store.write().await.take().is_some();
        let previous = self.state();
        self.force_state(ConnectionState::Disconnected);

        if had_store || previous != ConnectionState::Disconnected {
            info!("Disconnected from distributed store");
        }
    }

    /// Runs one liveness probe now. Returns whether the store answered.
    ///
    /// A failed probe demotes `Connected` to `Degraded`; a successful one
    /// promotes `Degraded` back to `Connected`.
    pub async fn probe(&self) -> bool {
        let store = self.store.read().await.clone();
        let Some(store) = store else {
            return false;
        };

        let healthy = match timeout(self.settings.op_timeout, store.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                debug!(timeout_ms = self.settings.op_timeout.as_millis() as u64, "Health probe timed out");
                false
            }
        };

        if healthy {
            if self.transition(ConnectionState::Degraded, ConnectionState::Connected) {
                info!("Health probe succeeded, distributed store back in service");
            }
        } else if self.transition(ConnectionState::Connected, ConnectionState::Degraded) {
            warn!("Health probe failed, routing cache traffic to the local store");
        }

        healthy
    }

    /// Records a failed distributed-store operation.
    ///
    /// Demotes `Connected` to `Degraded`; the health probe restores it.
    pub fn report_failure(&self, op: &str, error: &CacheError) {
        if self.transition(ConnectionState::Connected, ConnectionState::Degraded) {
            warn!(op, error = %error, "Distributed store operation failed, degrading to local store");
        } else {
            debug!(op, error = %error, state = %self.state(), "Distributed store operation failed");
        }
    }

    /// Runs a distributed-store call under the operation timeout.
    ///
    /// A timeout becomes [`CacheError::Timeout`]; transport errors and
    /// timeouts are passed to [`Self::report_failure`] before returning.
    pub async fn guarded<T, F>(&self, op: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        let result = match timeout(self.settings.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.settings.op_timeout)),
        };

        if let Err(e) = &result
            && e.is_transport()
        {
            self.report_failure(op, e);
        }

        result
    }

    async fn open_session(&self) -> Option<(u64, watch::Receiver<bool>)> {
        let Some(connector) = &self.connector else {
            debug!("Distributed store disabled, staying in memory-only mode");
            return None;
        };

        let mut slot = self.session.lock().await;
        let state = self.state();
        let exhausted = state == ConnectionState::Degraded && self.store.read().await.is_none();

        if state != ConnectionState::Disconnected && !exhausted {
            debug!(state = %state, "connect() ignored, connection already managed");
            return None;
        }

        if !self.transition(state, ConnectionState::Connecting) {
            return None;
        }

        // A previous exhausted session holds only finished tasks
        slot.take();

        let id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let (shutdown, rx) = watch::channel(false);
        *slot = Some(Session {
            id,
            shutdown,
            tasks: Vec::new(),
        });

        info!(target = %connector.describe(), "Connecting to distributed store");
        Some((id, rx))
    }

    async fn run_connect_cycle(self: &Arc<Self>, id: u64, mut shutdown: watch::Receiver<bool>) {
        let Some(connector) = self.connector.clone() else {
            return;
        };

        let outcome = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => None,
            result = self.establish(connector.as_ref()) => Some(result),
        };

        let Some(result) = outcome else {
            info!("Connect cycle abandoned, disconnect requested");
            return;
        };

        let mut slot = self.session.lock().await;
        let Some(session) = slot
            .as_mut()
            .filter(|s| s.id == id && !*s.shutdown.borrow())
        else {
            debug!("Session closed while connecting, discarding result");
            return;
        };

        match result {
            Ok(store) => {
                *self.store.write().await = Some(store);
                self.force_state(ConnectionState::Connected);
                let probe = self.spawn_health_probe(session.shutdown.subscribe());
                session.tasks.push(probe);
            }
            Err(e) => {
                warn!(
                    attempts = self.settings.max_reconnect_attempts,
                    error = %e,
                    "Reconnect attempts exhausted, continuing in degraded mode on the local store"
                );
                self.force_state(ConnectionState::Degraded);
            }
        }
    }

    async fn establish(&self, connector: &dyn StoreConnector) -> CacheResult<Arc<dyn KeyValueStore>> {
        let attempts = AtomicU32::new(0);

        Retry::spawn(backoff_delays(&self.settings), || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            self.attempt_connect(connector, attempt)
        })
        .await
    }

    async fn attempt_connect(
        &self,
        connector: &dyn StoreConnector,
        attempt: u32,
    ) -> CacheResult<Arc<dyn KeyValueStore>> {
        if attempt > 1 {
            self.transition(ConnectionState::Connecting, ConnectionState::Reconnecting);
        }

        let max_attempts = self.settings.max_reconnect_attempts;
        match timeout(self.settings.connect_timeout, connector.connect()).await {
            Ok(Ok(store)) => {
                info!(attempt, backend = store.backend_name(), "Distributed store connection established");
                Ok(store)
            }
            Ok(Err(e)) => {
                warn!(attempt, max_attempts, error = %e, "Distributed store connection attempt failed");
                Err(e)
            }
            Err(_) => {
                warn!(attempt, max_attempts, "Distributed store connection attempt timed out");
                Err(CacheError::Timeout(self.settings.connect_timeout))
            }
        }
    }

    fn spawn_health_probe(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let every = self.settings.health_check_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = interval.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        manager.probe().await;
                    }
                }
            }
            debug!("Health probe stopped");
        })
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        if self.state() != from {
            return false;
        }
        if to == ConnectionState::Connected {
            // Bump first so no reader sees Connected with a stale epoch
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }

        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            self.publish(from, to);
        }
        swapped
    }

    fn force_state(&self, to: ConnectionState) {
        if to == ConnectionState::Connected {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        let previous = ConnectionState::from(self.state.swap(to as u8, Ordering::AcqRel));
        if previous != to {
            self.publish(previous, to);
        }
    }

    fn publish(&self, from: ConnectionState, to: ConnectionState) {
        self.state_tx.send_replace(to);
        info!(from = %from, to = %to, "Cache connection state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::service::{MockKeyValueStore, MockStoreConnector};

    fn fast_settings() -> ConnectionSettings {
        ConnectionSettings {
            health_check_interval: Duration::from_secs(5),
            max_reconnect_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(250),
            op_timeout: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
        }
    }

    fn healthy_store() -> Arc<dyn KeyValueStore> {
        let mut store = MockKeyValueStore::new();
        store.expect_ping().returning(|| Ok(()));
        store.expect_backend_name().return_const("mock");
        Arc::new(store)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let settings = ConnectionSettings {
            max_reconnect_attempts: 5,
            ..fast_settings()
        };

        let delays: Vec<Duration> = backoff_delays(&settings).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250),
                Duration::from_millis(250),
            ]
        );
    }

    #[test]
    fn test_single_attempt_has_no_delays() {
        let settings = ConnectionSettings {
            max_reconnect_attempts: 1,
            ..fast_settings()
        };
        assert_eq!(backoff_delays(&settings).count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_manager_never_connects() {
        let manager = Arc::new(ConnectionManager::disabled(fast_settings()));
        manager.connect().await;

        assert!(!manager.is_enabled());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.active_store().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success_then_idempotent() {
        let mut connector = MockStoreConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|| Ok(healthy_store()));
        connector
            .expect_describe()
            .return_const("mock://".to_string());

        let manager = Arc::new(ConnectionManager::new(Arc::new(connector), fast_settings()));
        manager.connect().await;
        manager.connect().await;

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.epoch(), 1);
        assert!(manager.active_store().await.is_some());

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.active_store().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_settle_in_degraded() {
        let mut connector = MockStoreConnector::new();
        connector
            .expect_connect()
            .times(3)
            .returning(|| Err(CacheError::Transport("connection refused".into())));
        connector
            .expect_describe()
            .return_const("mock://".to_string());

        let manager = Arc::new(ConnectionManager::new(Arc::new(connector), fast_settings()));
        manager.connect().await;

        assert_eq!(manager.state(), ConnectionState::Degraded);
        assert!(manager.active_store().await.is_none());
        assert!(!manager.probe().await);
        assert_eq!(manager.state(), ConnectionState::Degraded);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_failure_degrades_and_probe_heals() {
        let mut connector = MockStoreConnector::new();
        connector.expect_connect().returning(|| Ok(healthy_store()));
        connector
            .expect_describe()
            .return_const("mock://".to_string());

        let manager = Arc::new(ConnectionManager::new(Arc::new(connector), fast_settings()));
        manager.connect().await;

        manager.report_failure("get", &CacheError::Transport("broken pipe".into()));
        assert_eq!(manager.state(), ConnectionState::Degraded);
        assert!(manager.active_store().await.is_none());

        assert!(manager.probe().await);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.epoch(), 2);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_timeout_degrades() {
        let mut connector = MockStoreConnector::new();
        connector.expect_connect().returning(|| Ok(healthy_store()));
        connector
            .expect_describe()
            .return_const("mock://".to_string());

        let manager = Arc::new(ConnectionManager::new(Arc::new(connector), fast_settings()));
        manager.connect().await;

        let result: CacheResult<()> = manager
            .guarded("get", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CacheError::Timeout(_))));
        assert_eq!(manager.state(), ConnectionState::Degraded);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_operation_error_keeps_connected() {
        let mut connector = MockStoreConnector::new();
        connector.expect_connect().returning(|| Ok(healthy_store()));
        connector
            .expect_describe()
            .return_const("mock://".to_string());

        let manager = Arc::new(ConnectionManager::new(Arc::new(connector), fast_settings()));
        manager.connect().await;

        let result: CacheResult<()> = manager
            .guarded("incr", async { Err(CacheError::Operation("WRONGTYPE".into())) })
            .await;

        assert!(result.is_err());
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_are_published() {
        let mut connector = MockStoreConnector::new();
        connector.expect_connect().returning(|| Ok(healthy_store()));
        connector
            .expect_describe()
            .return_const("mock://".to_string());

        let manager = Arc::new(ConnectionManager::new(Arc::new(connector), fast_settings()));
        let rx = manager.subscribe();

        manager.connect().await;
        assert_eq!(*rx.borrow(), ConnectionState::Connected);

        manager.disconnect().await;
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
    }
}
