//! Typed publish/subscribe for connection lifecycle and data events.
//!
//! DESIGN
//! ======
//! Handlers are plain closures keyed by a [`SubscriptionId`]; unsubscribing
//! takes the id back. Publishing snapshots the handler list and runs it with
//! no lock held, so a handler may subscribe, unsubscribe, or trigger further
//! events on the same bus.
//!
//! Async consumers can take an unbounded channel instead of a callback via
//! [`EventBus::channel`]. Closed channels are pruned on the next publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::state::ConnectionState;

// =============================================================================
// EVENTS
// =============================================================================

/// Host-facing notification published by a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Negotiation succeeded; transports are about to be tried.
    Starting,
    /// The first transport connected.
    Started,
    /// A request is about to be built (connect URL or outgoing payload).
    Sending,
    /// One inbound payload.
    Received(Value),
    /// A connection-level fault.
    Error(ClientError),
    /// Keep-alive warning threshold crossed; fired once per silence episode.
    ConnectionSlow,
    /// An established connection was lost and recovery began.
    Reconnecting,
    /// Recovery succeeded; fired once per reconnection episode.
    Reconnected,
    /// Guarded state transition applied.
    StateChanged { old: ConnectionState, new: ConnectionState },
    /// The connection stopped.
    Disconnected,
}

impl ConnectionEvent {
    /// Stable lowercase name, used in log lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Sending => "sending",
            Self::Received(_) => "received",
            Self::Error(_) => "error",
            Self::ConnectionSlow => "connectionSlow",
            Self::Reconnecting => "reconnecting",
            Self::Reconnected => "reconnected",
            Self::StateChanged { .. } => "stateChanged",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

// =============================================================================
// EVENT BUS
// =============================================================================

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Handler)>>,
    channels: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Handlers run in subscription order.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Receive every subsequent event on a channel.
    pub fn channel(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver an event to every handler, then every live channel.
    pub fn publish(&self, event: &ConnectionEvent) {
        let snapshot: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(event);
        }

        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of registered callback handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
