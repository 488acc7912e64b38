//! Connection lifecycle state and its guarded transition primitive.
//!
//! DESIGN
//! ======
//! State only moves through [`StateCell::change`], a compare-and-swap under a
//! per-connection lock. A transition whose expected prior state does not match
//! is a no-op that reports `false` and publishes nothing. A successful one
//! publishes `StateChanged` after the lock is released, so handlers may read
//! the new state (or attempt further transitions) without deadlocking.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::events::{ConnectionEvent, EventBus};

// =============================================================================
// STATE
// =============================================================================

/// Lifecycle position of a connection.
///
/// Numeric values follow the protocol convention
/// (`connecting = 0`, `connected = 1`, `reconnecting = 2`, `disconnected = 4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    /// Protocol numeric value.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Reconnecting => 2,
            Self::Disconnected => 4,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

// =============================================================================
// STATE CELL
// =============================================================================

/// Per-connection state holder. Starts `Disconnected`.
pub struct StateCell {
    current: Mutex<ConnectionState>,
}

impl StateCell {
    #[must_use]
    pub fn new() -> Self {
        Self { current: Mutex::new(ConnectionState::Disconnected) }
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `expected -> next` if the current state is `expected`.
    ///
    /// Returns `true` and publishes `StateChanged` on success; returns `false`
    /// and publishes nothing otherwise.
    pub fn change(&self, events: &EventBus, expected: ConnectionState, next: ConnectionState) -> bool {
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if *current != expected {
                return false;
            }
            *current = next;
        }
        events.publish(&ConnectionEvent::StateChanged { old: expected, new: next });
        true
    }

    /// Like [`change`](Self::change) but silent; the caller publishes
    /// `StateChanged` once it has released its own locks.
    pub fn swap_if(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != expected {
            return false;
        }
        *current = next;
        true
    }

    /// Move from whatever the state is now to `next`.
    ///
    /// Still a compare-and-swap: the expected state is read under the lock,
    /// so the published `old` value is exact.
    pub fn change_from_current(&self, events: &EventBus, next: ConnectionState) -> ConnectionState {
        let old = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            let old = *current;
            *current = next;
            old
        };
        events.publish(&ConnectionEvent::StateChanged { old, new: next });
        old
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
