//! Backend selection from connection state.

use crate::domain::ConnectionState;

/// Which store serves an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Distributed,
    Local,
}

/// Picks the backend for the current connection state.
///
/// Only a healthy connection routes to the distributed store; every other
/// state, including transient ones, stays on the local store.
pub fn route_decision(state: ConnectionState) -> Backend {
    match state {
        ConnectionState::Connected => Backend::Distributed,
        ConnectionState::Disconnected
        | ConnectionState::Connecting
        | ConnectionState::Degraded
        | ConnectionState::Reconnecting => Backend::Local,
    }
}
