//! Lifecycle states of the link to the distributed store.

use serde::Serialize;
use std::fmt;

/// Current state of the distributed-store connection.
///
/// Written only by [`crate::infrastructure::cache::ConnectionManager`]; the cache and the
/// rate limiter read it to decide which backend serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection and no attempt in progress (initial state, after teardown,
    /// or permanently when the distributed store is disabled).
    Disconnected = 0,
    /// First connection attempt of a cycle is running.
    Connecting = 1,
    /// Connected and the last health probe succeeded.
    Connected = 2,
    /// A connection exists but probes or operations are failing, or every
    /// reconnect attempt of the last cycle was exhausted.
    Degraded = 3,
    /// A retry attempt after backoff is running.
    Reconnecting = 4,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Whether a connect cycle is currently running.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            4 => Self::Reconnecting,
            // Unknown values map to the state that keeps traffic on the local store
            _ => Self::Degraded,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
