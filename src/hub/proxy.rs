//! Client-side handle for one server hub.
//!
//! DESIGN
//! ======
//! A proxy carries the hub's round-tripped state mapping and the handlers
//! for server-initiated calls. Hub and event names are lowercased on the way
//! in, so lookups from inbound traffic are case-insensitive.
//!
//! `invoke` registers the call before sending it, so a response that races
//! the send still finds its entry.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use super::registry::InvocationRegistry;
use crate::connection::Connection;
use crate::error::ClientError;
use crate::protocol::HubInvocation;

type Handler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle returned by [`HubProxy::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Convert one argument to its wire value. Values that cannot be
/// represented become `null` so positional arity is kept.
pub fn arg<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

struct ProxyShared {
    hub_name: String,
    connection: Connection,
    registry: Arc<InvocationRegistry>,
    state: Mutex<Map<String, Value>>,
    handlers: Mutex<BTreeMap<String, Vec<(HandlerId, Handler)>>>,
    next_handler: AtomicU64,
}

#[derive(Clone)]
pub struct HubProxy {
    shared: Arc<ProxyShared>,
}

impl HubProxy {
    pub(crate) fn new(hub_name: &str, connection: Connection, registry: Arc<InvocationRegistry>) -> Self {
        Self {
            shared: Arc::new(ProxyShared {
                hub_name: hub_name.to_lowercase(),
                connection,
                registry,
                state: Mutex::new(Map::new()),
                handlers: Mutex::new(BTreeMap::new()),
                next_handler: AtomicU64::new(1),
            }),
        }
    }

    /// Lowercased hub name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.hub_name
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Handle server calls to `event` on this hub.
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let id = HandlerId(self.shared.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers()
            .entry(event.to_lowercase())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one handler, or every handler for `event` when `handler` is
    /// `None`. Returns whether anything was removed.
    pub fn off(&self, event: &str, handler: Option<HandlerId>) -> bool {
        let key = event.to_lowercase();
        let mut handlers = self.handlers();
        let Some(list) = handlers.get_mut(&key) else {
            return false;
        };
        let removed = match handler {
            Some(id) => {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                list.len() != before
            }
            None => true,
        };
        if handler.is_none() || list.is_empty() {
            handlers.remove(&key);
        }
        removed
    }

    /// Whether any event has at least one handler.
    #[must_use]
    pub fn has_subscriptions(&self) -> bool {
        !self.handlers().is_empty()
    }

    // =========================================================================
    // STATE
    // =========================================================================

    #[must_use]
    pub fn state(&self) -> Map<String, Value> {
        self.state_map().clone()
    }

    /// Set one state field sent with every invocation.
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state_map().insert(key.into(), value);
    }

    /// Overlay server-returned fields, last write wins.
    pub(crate) fn merge_state(&self, fields: Map<String, Value>) {
        self.state_map().extend(fields);
    }

    // =========================================================================
    // INVOCATION
    // =========================================================================

    /// Call `method` on the server hub.
    ///
    /// The returned future resolves with the method's result, or
    /// [`ClientError::Invocation`] carrying the server's error message. A
    /// call that cannot be sent resolves with the send error.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> Invocation {
        let shared = &self.shared;
        let (id, rx) = shared.registry.register(shared.connection.key(), &shared.hub_name);
        let state = self.state();
        let envelope = HubInvocation { hub: &shared.hub_name, method, args: &args, state: &state, id };

        let sent = shared.connection.send_json(&envelope);
        if let Err(e) = sent {
            shared.registry.cancel(id);
            shared.connection.log(&format!("failed to invoke {}.{method}: {e}", shared.hub_name));
            return Invocation { id, registry: Arc::clone(&shared.registry), rx: None, failed: Some(e) };
        }
        Invocation { id, registry: Arc::clone(&shared.registry), rx: Some(rx), failed: None }
    }

    /// [`invoke`](Self::invoke) and deserialize the result.
    ///
    /// # Errors
    ///
    /// As `invoke`, plus [`ClientError::Serialization`] when the result does
    /// not fit `T`.
    pub async fn invoke_as<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T, ClientError> {
        let value = self.invoke(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Run every handler registered for `method` with `args`. Returns the
    /// number of handlers run.
    pub(crate) fn dispatch(&self, method: &str, args: &[Value]) -> usize {
        let snapshot: Vec<Handler> = self
            .handlers()
            .get(&method.to_lowercase())
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();
        for handler in &snapshot {
            handler(args);
        }
        snapshot.len()
    }

    fn handlers(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<(HandlerId, Handler)>>> {
        self.shared.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_map(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for HubProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubProxy")
            .field("hub", &self.shared.hub_name)
            .field("subscribed", &self.has_subscriptions())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// INVOCATION FUTURE
// =============================================================================

/// Outcome of one [`HubProxy::invoke`] call. Dropping it before it resolves
/// withdraws the call's registration.
#[derive(Debug)]
pub struct Invocation {
    id: u64,
    registry: Arc<InvocationRegistry>,
    rx: Option<oneshot::Receiver<Result<Value, ClientError>>>,
    failed: Option<ClientError>,
}

impl Invocation {
    /// Callback id carried in the envelope.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for Invocation {
    type Output = Result<Value, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(err) = self.failed.take() {
            return Poll::Ready(Err(err));
        }
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(Err(ClientError::Stopped));
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(outcome) => {
                self.rx = None;
                Poll::Ready(outcome.unwrap_or(Err(ClientError::Stopped)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.registry.cancel(self.id);
        }
    }
}

#[cfg(test)]
#[path = "proxy_test.rs"]
mod tests;
