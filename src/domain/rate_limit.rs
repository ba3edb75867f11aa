//! Rate limiting policy model and admission decisions.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Named rate limiting policy bucket.
///
/// Each class carries its own quota, window and block penalty (see [`LimiterPolicy`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterClass {
    /// Per-request quota for API-key traffic.
    Api,
    /// Login and session endpoints.
    Auth,
    /// Link creation.
    Shorten,
    /// Password verification for protected links.
    Password,
    /// Bulk import/export operations.
    Bulk,
}

impl LimiterClass {
    pub const ALL: [LimiterClass; 5] = [
        Self::Api,
        Self::Auth,
        Self::Shorten,
        Self::Password,
        Self::Bulk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Auth => "auth",
            Self::Shorten => "shorten",
            Self::Password => "password",
            Self::Bulk => "bulk",
        }
    }
}

impl fmt::Display for LimiterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimiterClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "auth" => Ok(Self::Auth),
            "shorten" => Ok(Self::Shorten),
            "password" => Ok(Self::Password),
            "bulk" => Ok(Self::Bulk),
            other => Err(format!(
                "unknown limiter class '{}' (expected api, auth, shorten, password or bulk)",
                other
            )),
        }
    }
}

/// Quota, window and block penalty for one [`LimiterClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterPolicy {
    /// Requests admitted per window. `0` denies every request.
    pub quota: u32,
    /// Fixed window length in seconds.
    pub window_seconds: u64,
    /// Penalty applied once the quota is exceeded.
    ///
    /// Zero or negative means "use `window_seconds`".
    pub block_duration_seconds: i64,
}

impl LimiterPolicy {
    pub const fn new(quota: u32, window_seconds: u64, block_duration_seconds: i64) -> Self {
        Self {
            quota,
            window_seconds,
            block_duration_seconds,
        }
    }

    /// Block duration actually enforced.
    pub fn effective_block_seconds(&self) -> u64 {
        if self.block_duration_seconds > 0 {
            self.block_duration_seconds as u64
        } else {
            self.window_seconds
        }
    }
}

/// Per-class policies, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterPolicies {
    pub api: LimiterPolicy,
    pub auth: LimiterPolicy,
    pub shorten: LimiterPolicy,
    pub password: LimiterPolicy,
    pub bulk: LimiterPolicy,
}

impl LimiterPolicies {
    pub fn get(&self, class: LimiterClass) -> &LimiterPolicy {
        match class {
            LimiterClass::Api => &self.api,
            LimiterClass::Auth => &self.auth,
            LimiterClass::Shorten => &self.shorten,
            LimiterClass::Password => &self.password,
            LimiterClass::Bulk => &self.bulk,
        }
    }

    pub fn get_mut(&mut self, class: LimiterClass) -> &mut LimiterPolicy {
        match class {
            LimiterClass::Api => &mut self.api,
            LimiterClass::Auth => &mut self.auth,
            LimiterClass::Shorten => &mut self.shorten,
            LimiterClass::Password => &mut self.password,
            LimiterClass::Bulk => &mut self.bulk,
        }
    }

    /// Returns a copy with `class` replaced by `policy`.
    pub fn with(mut self, class: LimiterClass, policy: LimiterPolicy) -> Self {
        *self.get_mut(class) = policy;
        self
    }
}

impl Default for LimiterPolicies {
    fn default() -> Self {
        Self {
            api: LimiterPolicy::new(100, 60, 60),
            auth: LimiterPolicy::new(10, 900, 900),
            shorten: LimiterPolicy::new(30, 60, 300),
            password: LimiterPolicy::new(5, 300, 1800),
            bulk: LimiterPolicy::new(5, 3600, 3600),
        }
    }
}

/// Outcome of one consumption attempt.
///
/// A denial is a normal result, not an error; callers turn it into a
/// user-facing response (e.g. `429 Too Many Requests`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_seconds: u64,
}

impl AdmissionDecision {
    pub fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after_seconds: 0,
        }
    }

    pub fn deny(retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after_seconds,
        }
    }
}
