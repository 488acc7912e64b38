//! Hub connections: RPC and server broadcasts over a persistent connection.
//!
//! DESIGN
//! ======
//! A `HubConnection` contains a plain [`Connection`] and extends its
//! pipeline through one event subscription:
//!
//! - `starting` / `sending`: rebuild the connection data to list the hubs
//!   that have at least one handler, so the server only routes broadcasts
//!   this client listens for.
//! - `received`: correlate invocation results by id, or dispatch server
//!   calls to the named proxy's handlers.
//! - `disconnected`: reject every call still waiting on this connection.
//!
//! The subscription holds only a weak reference back to the hub, so the
//! connection never keeps its hub alive. Dropping the last `HubConnection`
//! handle removes the subscription.
//!
//! Proxies are created by the application, never by inbound traffic. A
//! server call for a hub with no proxy is logged and dropped.

pub mod proxy;
pub mod registry;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::{Value, json};
use tokio::sync::mpsc;

pub use proxy::{HandlerId, HubProxy, Invocation, arg};
pub use registry::InvocationRegistry;

use crate::config::{HubOptions, StartOptions};
use crate::connection::{Connection, StopOptions};
use crate::error::ClientError;
use crate::events::{ConnectionEvent, SubscriptionId};
use crate::net::Net;
use crate::protocol::{self, HubBroadcast, HubMessage, HubResult};
use crate::state::ConnectionState;

/// Path appended to the URL when `use_default_path` is set.
pub const DEFAULT_PATH: &str = "/signalr";

struct HubShared {
    connection: Connection,
    registry: Arc<InvocationRegistry>,
    proxies: Mutex<BTreeMap<String, HubProxy>>,
    hook: SubscriptionId,
}

#[derive(Clone)]
pub struct HubConnection {
    shared: Arc<HubShared>,
}

impl HubConnection {
    pub fn new(url: impl Into<String>, options: HubOptions, net: Net) -> Self {
        Self::with_registry(url, options, net, Arc::new(InvocationRegistry::new()))
    }

    /// Build a hub connection whose invocations are tracked in `registry`.
    pub fn with_registry(
        url: impl Into<String>,
        options: HubOptions,
        net: Net,
        registry: Arc<InvocationRegistry>,
    ) -> Self {
        let url = hub_url(url.into(), options.use_default_path);
        let connection = Connection::with_query(url, options.query, options.config, net);

        let shared = Arc::new_cyclic(|weak: &Weak<HubShared>| {
            let weak = weak.clone();
            let hook = connection.subscribe(move |event| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_event(event);
                }
            });
            HubShared { connection, registry, proxies: Mutex::new(BTreeMap::new()), hook }
        });
        Self { shared }
    }

    // =========================================================================
    // PROXIES
    // =========================================================================

    /// Proxy for `hub_name`, created on first use. Names are
    /// case-insensitive.
    pub fn create_proxy(&self, hub_name: &str) -> HubProxy {
        let key = hub_name.to_lowercase();
        let mut proxies = self.shared.proxies();
        if let Some(existing) = proxies.get(&key) {
            return existing.clone();
        }
        self.shared.connection.log(&format!("creating new hub proxy instance for hub '{key}'"));
        let proxy = HubProxy::new(&key, self.shared.connection.clone(), Arc::clone(&self.shared.registry));
        proxies.insert(key, proxy.clone());
        proxy
    }

    /// Existing proxy for `hub_name`, if one was created.
    #[must_use]
    pub fn proxy(&self, hub_name: &str) -> Option<HubProxy> {
        self.shared.proxy(&hub_name.to_lowercase())
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.shared.connection
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<InvocationRegistry> {
        &self.shared.registry
    }

    /// # Errors
    ///
    /// See [`Connection::start`].
    pub async fn start(&self, options: StartOptions) -> Result<(), ClientError> {
        self.shared.connection.start(options).await
    }

    pub fn stop(&self) {
        self.shared.connection.stop();
    }

    pub async fn stop_with(&self, options: StopOptions) {
        self.shared.connection.stop_with(options).await;
    }

    /// Send a raw payload, bypassing hub framing.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub fn send(&self, data: impl Into<String>) -> Result<(), ClientError> {
        self.shared.connection.send(data)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    pub fn events(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.shared.connection.events()
    }
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hubs: Vec<String> = self.shared.proxies().keys().cloned().collect();
        f.debug_struct("HubConnection")
            .field("connection", &self.shared.connection)
            .field("hubs", &hubs)
            .finish_non_exhaustive()
    }
}

fn hub_url(url: String, use_default_path: bool) -> String {
    if url.is_empty() || use_default_path {
        return format!("{}{DEFAULT_PATH}", url.trim_end_matches('/'));
    }
    url
}

// =============================================================================
// PIPELINE HOOKS
// =============================================================================

impl HubShared {
    fn on_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Starting | ConnectionEvent::Sending => self.refresh_connection_data(),
            ConnectionEvent::Received(payload) => self.on_received(payload),
            ConnectionEvent::Disconnected => {
                let failed = self.registry.fail_connection(self.connection.key(), &ClientError::Stopped);
                if failed > 0 {
                    self.connection.log(&format!("rejected {failed} pending hub invocations"));
                }
            }
            _ => {}
        }
    }

    fn refresh_connection_data(&self) {
        let subscribed: Vec<Value> = self
            .proxies()
            .iter()
            .filter(|(_, proxy)| proxy.has_subscriptions())
            .map(|(name, _)| json!({ "name": name }))
            .collect();
        self.connection.set_connection_data(Some(Value::Array(subscribed).to_string()));
    }

    fn on_received(&self, payload: &Value) {
        match HubMessage::parse(payload) {
            Ok(Some(HubMessage::Result(result))) => self.resolve(result),
            Ok(Some(HubMessage::Broadcast(broadcast))) => self.broadcast(broadcast),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(connection = self.connection.key(), error = %e, "dropping malformed hub message");
            }
        }
    }

    fn resolve(&self, result: HubResult) {
        let Some(id) = protocol::id_text(&result.id).and_then(|text| text.parse::<u64>().ok()) else {
            tracing::warn!(connection = self.connection.key(), id = %result.id, "hub result with unusable id");
            return;
        };
        let Some(pending) = self.registry.take(self.connection.key(), id) else {
            self.connection.log(&format!("no pending invocation for id {id}"));
            return;
        };

        if let Some(state) = result.state {
            if let Some(proxy) = self.proxy(&pending.hub) {
                proxy.merge_state(state);
            }
        }

        let outcome = match result.error.filter(|message| !message.is_empty()) {
            Some(message) => {
                if let Some(trace) = result.stack_trace.as_deref().filter(|t| !t.is_empty()) {
                    self.connection.log(&format!("{message}\n{trace}"));
                }
                Err(ClientError::Invocation { message })
            }
            None => Ok(result.result.unwrap_or(Value::Null)),
        };
        // The caller may have dropped its future.
        let _ = pending.responder.send(outcome);
    }

    fn broadcast(&self, broadcast: HubBroadcast) {
        let hub = broadcast.hub.to_lowercase();
        let method = broadcast.method.to_lowercase();
        let Some(proxy) = self.proxy(&hub) else {
            tracing::warn!(
                connection = self.connection.key(),
                hub = %hub,
                method = %method,
                "server call for unknown hub"
            );
            return;
        };
        if let Some(state) = broadcast.state {
            proxy.merge_state(state);
        }
        let handled = proxy.dispatch(&method, &broadcast.args);
        if handled == 0 {
            self.connection.log(&format!("no handlers for {hub}.{method}"));
        }
    }

    fn proxy(&self, key: &str) -> Option<HubProxy> {
        self.proxies().get(key).cloned()
    }

    fn proxies(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, HubProxy>> {
        self.proxies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HubShared {
    fn drop(&mut self) {
        self.connection.unsubscribe(self.hook);
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
