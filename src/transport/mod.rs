//! Transport adapters and their registry.
//!
//! DESIGN
//! ======
//! Every adapter implements [`Transport`]: `start` for the initial connect,
//! then `send`, `stop`, `abort`, and `lost_connection` against the owning
//! [`Connection`]. Adapters own their runtime handles (socket, stream, frame,
//! poll loop) and the timers that drive their reconnection; `stop` releases
//! all of them.
//!
//! | Adapter                       | Keep-alive | Recovery                                |
//! |-------------------------------|------------|-----------------------------------------|
//! | [`SocketTransport`]           | yes        | reopen after `reconnect_delay`          |
//! | [`EventStreamTransport`]      | yes        | reopen after `reconnect_delay`          |
//! | [`FramePollingTransport`]     | yes        | renavigate the frame to the resume URL  |
//! | [`LongPollingTransport`]      | no         | poll-error handler re-polls after delay |
//!
//! Adapters are created fresh per `start()` from the connection's
//! [`TransportRegistry`], so no runtime state leaks between attempts.

pub mod common;
pub mod event_stream;
pub mod frame_polling;
pub mod long_polling;
pub mod socket;

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;

use crate::connection::Connection;
use crate::error::ClientError;

pub use event_stream::EventStreamTransport;
pub use frame_polling::FramePollingTransport;
pub use long_polling::LongPollingTransport;
pub use socket::SocketTransport;

pub const SOCKET: &str = "webSockets";
pub const EVENT_STREAM: &str = "serverSentEvents";
pub const FRAME_POLLING: &str = "foreverFrame";
pub const LONG_POLLING: &str = "longPolling";

/// Names starting with this are registered but never attempted.
pub const PRIVATE_PREFIX: &str = "_";

// =============================================================================
// TRANSPORT
// =============================================================================

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Wire name sent as the `transport` query parameter.
    fn name(&self) -> &str;

    /// Whether inbound traffic proves liveness (enables keep-alive checks).
    fn supports_keep_alive(&self) -> bool;

    /// Initial connect. `Ok` once the transport is live; `Err` means this
    /// candidate failed and must hold no timers, sockets, or requests.
    async fn start(&self, connection: &Connection) -> Result<(), ClientError>;

    /// Queue one outgoing payload.
    fn send(&self, connection: &Connection, data: String) -> Result<(), ClientError>;

    /// Release every runtime handle and cancel every timer. Idempotent.
    fn stop(&self, connection: &Connection);

    /// Build the best-effort server notification sent on stop, if any.
    fn abort(&self, connection: &Connection) -> Option<BoxFuture<'static, ()>>;

    /// Keep-alive timeout hook: begin recovery.
    fn lost_connection(&self, connection: &Connection) -> Result<(), ClientError>;
}

// =============================================================================
// REGISTRY
// =============================================================================

pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;

/// Named transport constructors, in registration order.
pub struct TransportRegistry {
    entries: Mutex<Vec<(String, TransportFactory)>>,
}

impl TransportRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    /// The four stock adapters in protocol order.
    #[must_use]
    pub fn standard() -> Self {
        let registry = Self::empty();
        registry.register(SOCKET, Arc::new(|| Arc::new(SocketTransport::new()) as Arc<dyn Transport>));
        registry.register(EVENT_STREAM, Arc::new(|| Arc::new(EventStreamTransport::new()) as Arc<dyn Transport>));
        registry.register(FRAME_POLLING, Arc::new(|| Arc::new(FramePollingTransport::new()) as Arc<dyn Transport>));
        registry.register(LONG_POLLING, Arc::new(|| Arc::new(LongPollingTransport::new()) as Arc<dyn Transport>));
        registry
    }

    /// Add a transport, or replace the constructor of an existing name while
    /// keeping its position.
    pub fn register(&self, name: &str, factory: TransportFactory) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.iter_mut().find(|(existing, _)| existing == name) {
            entry.1 = factory;
        } else {
            entries.push((name.to_owned(), factory));
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn create(&self, name: &str) -> Option<Arc<dyn Transport>> {
        let factory = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, factory)| Arc::clone(factory))?;
        Some(factory())
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
