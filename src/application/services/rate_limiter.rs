//! Fixed-window rate limiter with block penalties.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{AdmissionDecision, LimiterClass, LimiterPolicies, LimiterPolicy};
use crate::infrastructure::cache::{CacheResult, ConnectionManager, KeyValueStore};
use crate::infrastructure::clock::Clock;
use tracing::{debug, warn};

/// Storage keys for one (class, identifier) pair.
struct LimiterKeys {
    counter: String,
    block: String,
}

/// Admission control shared by every process behind the same Redis.
///
/// Counts requests per `(class, identifier)` in fixed windows of
/// `window_seconds`. The request that pushes the count past the quota starts a
/// block of `block_duration_seconds`, during which every request is denied
/// without being counted, even across window boundaries.
///
/// # Backends
///
/// Counters live in Redis while it is connected and in the local fallback
/// store otherwise. A failed Redis call is reported to the
/// [`ConnectionManager`] and the check is re-run locally. If the local store
/// fails too, the request is allowed (fail-open) and a warning is logged.
///
/// # Example
///
/// ```rust,ignore
/// let decision = limiter.check(LimiterClass::Password, &hashed_ip).await;
/// if !decision.allowed {
///     return Err(AppError::too_many_requests(decision.retry_after_seconds));
/// }
/// ```
pub struct RateLimiter {
    connection: Arc<ConnectionManager>,
    local: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    policies: LimiterPolicies,
    key_prefix: String,
}

impl RateLimiter {
    pub fn new(
        connection: Arc<ConnectionManager>,
        local: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        policies: LimiterPolicies,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            local,
            clock,
            policies,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn policies(&self) -> &LimiterPolicies {
        &self.policies
    }

    /// Consumes one unit of `identifier`'s quota for `class`.
    ///
    /// Never fails: backend errors end in fail-open.
    pub async fn check(&self, class: LimiterClass, identifier: &str) -> AdmissionDecision {
        let policy = *self.policies.get(class);

        if policy.quota == 0 {
            return self.record(class, AdmissionDecision::deny(policy.window_seconds), "none");
        }

        let keys = self.keys(class, identifier, &policy);

        if let Some(store) = self.connection.active_store().await {
            match self.evaluate(store.as_ref(), &policy, &keys, true).await {
                Ok(decision) => return self.record(class, decision, store.backend_name()),
                Err(e) => {
                    warn!(class = %class, error = %e, "Distributed rate limit check failed, using local store");
                }
            }
        }

        match self.evaluate(self.local.as_ref(), &policy, &keys, false).await {
            Ok(decision) => self.record(class, decision, self.local.backend_name()),
            Err(e) => {
                warn!(class = %class, error = %e, "Rate limiter unavailable, allowing request");
                metrics::counter!("rate_limit_fail_open_total", "class" => class.as_str())
                    .increment(1);
                AdmissionDecision::allow(policy.quota)
            }
        }
    }

    async fn evaluate(
        &self,
        store: &dyn KeyValueStore,
        policy: &LimiterPolicy,
        keys: &LimiterKeys,
        distributed: bool,
    ) -> CacheResult<AdmissionDecision> {
        let now = self.clock.now_secs();

        let blocked_until = self
            .call(distributed, "rate_limit_block_get", store.get(&keys.block))
            .await?
            .and_then(|raw| raw.parse::<i64>().ok());
        if let Some(until) = blocked_until
            && until > now
        {
            return Ok(AdmissionDecision::deny((until - now) as u64));
        }

        let window = Duration::from_secs(policy.window_seconds);
        let count = self
            .call(
                distributed,
                "rate_limit_incr",
                store.incr_with_expiry(&keys.counter, window),
            )
            .await?;

        if count > i64::from(policy.quota) {
            let block_secs = policy.effective_block_seconds();
            let block = Duration::from_secs(block_secs);
            let until = now.saturating_add(block_secs as i64);

            self.call(
                distributed,
                "rate_limit_block_set",
                store.set(&keys.block, &until.to_string(), Some(block)),
            )
            .await?;
            // Counter outlives the window so it expires together with the block
            self.call(
                distributed,
                "rate_limit_expire",
                store.expire(&keys.counter, block),
            )
            .await?;

            debug!(key = %keys.counter, count, blocked_until = until, "Quota exceeded, blocking");
            return Ok(AdmissionDecision::deny(block_secs));
        }

        let remaining = u32::try_from(i64::from(policy.quota) - count).unwrap_or(0);
        Ok(AdmissionDecision::allow(remaining))
    }

    async fn call<T, F>(&self, distributed: bool, op: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        if distributed {
            self.connection.guarded(op, fut).await
        } else {
            fut.await
        }
    }

    fn keys(&self, class: LimiterClass, identifier: &str, policy: &LimiterPolicy) -> LimiterKeys {
        let window = policy.window_seconds.max(1) as i64;
        let bucket = self.clock.now_secs().div_euclid(window);

        LimiterKeys {
            counter: format!("{}rl:{}:{}:{}", self.key_prefix, class, identifier, bucket),
            block: format!("{}rl:{}:{}:block", self.key_prefix, class, identifier),
        }
    }

    fn record(
        &self,
        class: LimiterClass,
        decision: AdmissionDecision,
        backend: &'static str,
    ) -> AdmissionDecision {
        let outcome = if decision.allowed { "allowed" } else { "denied" };
        metrics::counter!(
            "rate_limit_decisions_total",
            "class" => class.as_str(),
            "outcome" => outcome,
            "backend" => backend
        )
        .increment(1);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::{
        CacheError, ConnectionSettings, LocalFallbackStore, MockKeyValueStore,
    };
    use crate::infrastructure::clock::ManualClock;

    fn limiter_with(
        local: Arc<dyn KeyValueStore>,
        clock: Arc<ManualClock>,
        policies: LimiterPolicies,
    ) -> RateLimiter {
        let connection = Arc::new(ConnectionManager::disabled(ConnectionSettings::default()));
        RateLimiter::new(connection, local, clock, policies, "test:")
    }

    fn memory_limiter(policies: LimiterPolicies) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let local = Arc::new(LocalFallbackStore::new(clock.clone(), 10_000));
        let limiter = limiter_with(local, clock.clone(), policies);
        (clock, limiter)
    }

    #[tokio::test]
    async fn test_zero_quota_always_denies() {
        let policies =
            LimiterPolicies::default().with(LimiterClass::Bulk, LimiterPolicy::new(0, 120, 0));
        let (_clock, limiter) = memory_limiter(policies);

        let decision = limiter.check(LimiterClass::Bulk, "user-1").await;
        assert_eq!(decision, AdmissionDecision::deny(120));
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let policies =
            LimiterPolicies::default().with(LimiterClass::Shorten, LimiterPolicy::new(3, 60, 300));
        let (_clock, limiter) = memory_limiter(policies);

        let remaining: Vec<u32> = [
            limiter.check(LimiterClass::Shorten, "ip").await,
            limiter.check(LimiterClass::Shorten, "ip").await,
            limiter.check(LimiterClass::Shorten, "ip").await,
        ]
        .iter()
        .map(|d| d.remaining)
        .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check(LimiterClass::Shorten, "ip").await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_seconds, 300);
    }

    #[tokio::test]
    async fn test_blocked_retry_after_counts_down() {
        let policies =
            LimiterPolicies::default().with(LimiterClass::Auth, LimiterPolicy::new(1, 60, 600));
        let (clock, limiter) = memory_limiter(policies);

        assert!(limiter.check(LimiterClass::Auth, "ip").await.allowed);
        assert!(!limiter.check(LimiterClass::Auth, "ip").await.allowed);

        clock.advance(Duration::from_secs(100));
        let decision = limiter.check(LimiterClass::Auth, "ip").await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_seconds, 500);
    }

    #[tokio::test]
    async fn test_non_positive_block_uses_window() {
        let policies =
            LimiterPolicies::default().with(LimiterClass::Api, LimiterPolicy::new(1, 45, -1));
        let (_clock, limiter) = memory_limiter(policies);

        limiter.check(LimiterClass::Api, "k").await;
        let decision = limiter.check(LimiterClass::Api, "k").await;
        assert_eq!(decision, AdmissionDecision::deny(45));
    }

    #[tokio::test]
    async fn test_classes_and_identifiers_are_independent() {
        let policies = LimiterPolicies::default()
            .with(LimiterClass::Api, LimiterPolicy::new(1, 60, 60))
            .with(LimiterClass::Auth, LimiterPolicy::new(1, 60, 60));
        let (_clock, limiter) = memory_limiter(policies);

        assert!(limiter.check(LimiterClass::Api, "a").await.allowed);
        assert!(limiter.check(LimiterClass::Api, "b").await.allowed);
        assert!(limiter.check(LimiterClass::Auth, "a").await.allowed);
        assert!(!limiter.check(LimiterClass::Api, "a").await.allowed);
    }

    #[tokio::test]
    async fn test_local_failure_fails_open() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let mut local = MockKeyValueStore::new();
        local
            .expect_get()
            .returning(|_| Err(CacheError::Operation("store poisoned".into())));
        local.expect_backend_name().return_const("memory");

        let limiter = limiter_with(Arc::new(local), clock, LimiterPolicies::default());

        let decision = limiter.check(LimiterClass::Password, "ip").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, LimiterPolicies::default().password.quota);
    }

    #[tokio::test]
    async fn test_keys_include_prefix_class_and_bucket() {
        let (_clock, limiter) = memory_limiter(LimiterPolicies::default());
        let policy = LimiterPolicy::new(5, 300, 1800);

        let keys = limiter.keys(LimiterClass::Password, "abc", &policy);
        assert_eq!(keys.counter, "test:rl:password:abc:5666666");
        assert_eq!(keys.block, "test:rl:password:abc:block");
    }
}
