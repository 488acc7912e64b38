//! Persistent connection: lifecycle, negotiation, and the transport-facing
//! plumbing shared by every adapter.
//!
//! DESIGN
//! ======
//! `Connection` is a cheap handle over shared state. The lifecycle follows
//! four states moved only by compare-and-swap (see [`crate::state`]):
//!
//! ```text
//! Disconnected --start--> Connecting --transport up--> Connected
//!      ^                      |                        |     ^
//!      |                      |                  lost  v     | resumed
//!      +--------stop----------+-------------------- Reconnecting
//! ```
//!
//! Each start attempt owns a cancellation token. `stop()` cancels it, which
//! abandons an in-flight negotiation or transport start, and any response
//! that lands afterwards is recognised as stale and discarded. Callers that
//! call `start()` while an attempt is in flight join that attempt's outcome.
//!
//! ERROR HANDLING
//! ==============
//! Connection-level faults are published as `ConnectionEvent::Error`. Faults
//! that end a start attempt also reject the `start()` future. Negotiation and
//! transport-exhaustion failures stop the connection; a protocol version
//! mismatch leaves it `Connecting` until the caller stops it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, QueryString, StartOptions, TransportChoice, TransportPreference};
use crate::endpoint::{self, ConnectParams, Endpoint};
use crate::error::ClientError;
use crate::events::{ConnectionEvent, EventBus, SubscriptionId};
use crate::keepalive::{KeepAliveMonitor, KeepAliveSettings};
use crate::net::{HttpClient, HttpRequest, Net};
use crate::protocol::{Frame, NegotiateResponse};
use crate::selector::{self, Selection};
use crate::state::{ConnectionState, StateCell};
use crate::transport::{self, Transport, TransportFactory, TransportRegistry};

static NEXT_CONNECTION_KEY: AtomicU64 = AtomicU64::new(1);

type Outcome = Option<Result<(), ClientError>>;

// =============================================================================
// TYPES
// =============================================================================

/// Options for [`Connection::stop_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOptions {
    /// Await the abort request instead of firing and forgetting it.
    pub wait_for_abort: bool,
    /// Tell the server the connection is going away.
    pub notify_server: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self { wait_for_abort: false, notify_server: true }
    }
}

/// Negotiated and resumable session data.
#[derive(Debug, Clone, Default)]
struct Session {
    endpoint: Option<Endpoint>,
    connection_id: Option<String>,
    app_relative_url: String,
    web_socket_server_url: Option<String>,
    protocol_version: Option<String>,
    message_id: Option<String>,
    groups: Option<Value>,
    connection_data: Option<String>,
    jsonp: bool,
}

struct Inner {
    key: u64,
    url: String,
    query: Option<String>,
    config: ClientConfig,
    net: Net,
    registry: TransportRegistry,
    events: EventBus,
    state: StateCell,
    session: Mutex<Session>,
    keep_alive: KeepAliveMonitor,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    attempt: Mutex<Option<watch::Sender<Outcome>>>,
    cancel: Mutex<CancellationToken>,
    halting: AtomicBool,
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Non-owning handle used by long-lived background tasks.
#[derive(Clone)]
pub struct WeakConnection(Weak<Inner>);

impl WeakConnection {
    #[must_use]
    pub fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|inner| Connection { inner })
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

impl Connection {
    pub fn new(url: impl Into<String>, config: ClientConfig, net: Net) -> Self {
        Self::with_query(url, None, config, net)
    }

    pub fn with_query(url: impl Into<String>, query: Option<QueryString>, config: ClientConfig, net: Net) -> Self {
        Self {
            inner: Arc::new(Inner {
                key: NEXT_CONNECTION_KEY.fetch_add(1, Ordering::Relaxed),
                url: url.into(),
                query: query.and_then(|q| q.encode()),
                config,
                net,
                registry: TransportRegistry::standard(),
                events: EventBus::new(),
                state: StateCell::new(),
                session: Mutex::new(Session::default()),
                keep_alive: KeepAliveMonitor::new(),
                transport: Mutex::new(None),
                attempt: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
                halting: AtomicBool::new(false),
            }),
        }
    }

    /// Process-unique key of this connection.
    #[must_use]
    pub fn key(&self) -> u64 {
        self.inner.key
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Server-assigned connection id, once negotiated.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.session().connection_id.clone()
    }

    #[must_use]
    pub fn protocol_version(&self) -> Option<String> {
        self.session().protocol_version.clone()
    }

    /// Last-seen server cursor.
    #[must_use]
    pub fn message_id(&self) -> Option<String> {
        self.session().message_id.clone()
    }

    /// Server-assigned membership token.
    #[must_use]
    pub fn groups(&self) -> Option<Value> {
        self.session().groups.clone()
    }

    /// Opaque `connectionData` sent on connect URLs.
    #[must_use]
    pub fn connection_data(&self) -> Option<String> {
        self.session().connection_data.clone()
    }

    pub fn set_connection_data(&self, data: Option<String>) {
        self.session().connection_data = data;
    }

    #[must_use]
    pub fn keep_alive_settings(&self) -> Option<KeepAliveSettings> {
        self.inner.keep_alive.settings()
    }

    /// Name of the active transport.
    #[must_use]
    pub fn transport_name(&self) -> Option<String> {
        self.current_transport().map(|t| t.name().to_owned())
    }

    /// Register (or replace) a transport constructor. Custom names are tried
    /// after the stock ones under `auto`.
    pub fn register_transport(&self, name: &str, factory: TransportFactory) {
        self.inner.registry.register(name, factory);
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Every subsequent event, as a channel.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.inner.events.channel()
    }

    /// Start the connection.
    ///
    /// Resolves once a transport is live. If an attempt is already running
    /// this joins it; if the connection is already up this resolves at once.
    ///
    /// # Errors
    ///
    /// Returns the fault that ended the attempt: invalid URL, negotiation,
    /// protocol version, transport exhaustion, or [`ClientError::Stopped`].
    pub async fn start(&self, options: StartOptions) -> Result<(), ClientError> {
        let fresh = {
            let mut slot = self.inner.attempt.lock().unwrap_or_else(PoisonError::into_inner);
            if self
                .inner
                .state
                .swap_if(ConnectionState::Disconnected, ConnectionState::Connecting)
            {
                let (attempt, _) = watch::channel(None);
                *slot = Some(attempt.clone());
                let cancel = CancellationToken::new();
                *self.inner.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();
                Ok((attempt, cancel))
            } else {
                Err(slot.clone())
            }
        };

        let (attempt, cancel) = match fresh {
            Ok(fresh) => fresh,
            Err(pending) => {
                return match (self.state(), pending) {
                    (ConnectionState::Connected | ConnectionState::Reconnecting, _) => Ok(()),
                    (_, Some(attempt)) => join(attempt.subscribe()).await,
                    (_, None) => Err(ClientError::Stopped),
                };
            }
        };
        self.inner.events.publish(&ConnectionEvent::StateChanged {
            old: ConnectionState::Disconnected,
            new: ConnectionState::Connecting,
        });

        let result = self.run_start(options, &cancel, &attempt).await;
        resolve_attempt(&attempt, result.clone());
        result
    }

    /// Send one payload over the active transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SendPrecondition`] unless the connection is
    /// `Connected`; otherwise whatever the transport reports.
    pub fn send(&self, data: impl Into<String>) -> Result<(), ClientError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(ClientError::SendPrecondition { state });
        }
        let Some(transport) = self.current_transport() else {
            return Err(ClientError::SendPrecondition { state: ConnectionState::Disconnected });
        };
        self.raise_sending();
        transport.send(self, data.into())
    }

    /// Serialize `value` and send it.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`ClientError::Serialization`].
    pub fn send_json<T: serde::Serialize>(&self, value: &T) -> Result<(), ClientError> {
        let text = serde_json::to_string(value)?;
        self.send(text)
    }

    /// Stop the connection, notifying the server without waiting. Idempotent.
    pub fn stop(&self) {
        if let Some(abort) = self.halt(true) {
            spawn_detached(abort);
        }
    }

    /// Stop with explicit abort behaviour. Idempotent.
    pub async fn stop_with(&self, options: StopOptions) {
        let Some(abort) = self.halt(options.notify_server) else {
            return;
        };
        if options.wait_for_abort {
            abort.await;
        } else {
            spawn_detached(abort);
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.inner))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.inner.key)
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn join(mut rx: watch::Receiver<Outcome>) -> Result<(), ClientError> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or(Err(ClientError::Stopped)),
        Err(_) => Err(ClientError::Stopped),
    }
}

/// Publish an attempt's result unless one was already recorded.
fn resolve_attempt(attempt: &watch::Sender<Outcome>, result: Result<(), ClientError>) {
    attempt.send_if_modified(|outcome| {
        if outcome.is_some() {
            return false;
        }
        *outcome = Some(result);
        true
    });
}

fn spawn_detached(task: BoxFuture<'static, ()>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(task);
    }
}

// =============================================================================
// START / STOP
// =============================================================================

impl Connection {
    async fn run_start(
        &self,
        options: StartOptions,
        cancel: &CancellationToken,
        attempt: &watch::Sender<Outcome>,
    ) -> Result<(), ClientError> {
        if let Err(err) = self.inner.config.validate() {
            return Err(self.fail_start(attempt, err, true));
        }
        let endpoint = match Endpoint::resolve(&self.inner.url, self.inner.config.origin.as_deref()) {
            Ok(endpoint) => endpoint,
            Err(err) => return Err(self.fail_start(attempt, err, true)),
        };

        let mut preference = options.transport;
        let mut jsonp = options.jsonp;
        if preference.is_auto() && jsonp {
            preference = TransportPreference::named([transport::LONG_POLLING]);
        }
        if endpoint.cross_origin {
            self.log("auto detected cross domain url");
            if preference.is_auto() {
                preference = TransportPreference::named([transport::SOCKET, transport::LONG_POLLING]);
            }
            if !jsonp {
                jsonp = !self.inner.config.supports_cross_origin;
                if jsonp {
                    self.log("using jsonp because this host doesn't support cross-origin requests");
                }
            }
        }

        let negotiate_url = endpoint::negotiate_url(&endpoint.url, self.inner.query.as_deref());
        {
            let mut session = self.session();
            *session = Session { connection_data: session.connection_data.take(), ..Session::default() };
            session.endpoint = Some(endpoint);
            session.jsonp = jsonp;
        }

        let Some(http) = self.http() else {
            let err = ClientError::Negotiation("no http client configured".into());
            return Err(self.fail_start(attempt, err, true));
        };

        self.log(&format!("negotiating with '{negotiate_url}'"));
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClientError::Stopped),
            response = http.request(HttpRequest::get(negotiate_url)) => response,
        };
        if cancel.is_cancelled() {
            return Err(ClientError::Stopped);
        }
        let negotiated = match response {
            Ok(body) => NegotiateResponse::parse(&body),
            Err(e) => Err(ClientError::Negotiation(e.to_string())),
        };
        let negotiated = match negotiated {
            Ok(negotiated) => negotiated,
            Err(err) => return Err(self.fail_start(attempt, err, true)),
        };

        {
            let mut session = self.session();
            session.connection_id = Some(negotiated.connection_id.clone());
            session.app_relative_url.clone_from(&negotiated.url);
            session.web_socket_server_url.clone_from(&negotiated.web_socket_server_url);
            session.protocol_version.clone_from(&negotiated.protocol_version);
        }
        let config = &self.inner.config;
        let settings = negotiated.keep_alive.filter(|interval| *interval > 0.0).and_then(|interval| {
            let settings =
                KeepAliveSettings::try_from_interval(interval, config.keep_alive_timeout_count, config.keep_alive_warn_at);
            if settings.is_none() {
                tracing::warn!(connection = self.inner.key, interval, "ignoring unusable keep alive interval");
            }
            settings
        });
        self.inner.keep_alive.configure(settings);

        if let Err(err) = negotiated.check_version() {
            return Err(self.fail_start(attempt, err, false));
        }

        self.inner.events.publish(&ConnectionEvent::Starting);

        let candidates = self.build_candidates(&preference, negotiated.try_web_sockets);
        match selector::initialize(self, candidates, cancel).await {
            Selection::Started(_) => Ok(()),
            Selection::Superseded => Err(ClientError::Stopped),
            Selection::Exhausted => Err(self.fail_start(attempt, ClientError::NoTransport, true)),
        }
    }

    /// Report a start failure: error event, rejected attempt, and optionally
    /// an implicit stop.
    fn fail_start(&self, attempt: &watch::Sender<Outcome>, err: ClientError, stop: bool) -> ClientError {
        self.log(&format!("start failed: {err}"));
        self.raise_error(err.clone());
        resolve_attempt(attempt, Err(err.clone()));
        if stop {
            self.stop();
        }
        err
    }

    /// Candidate adapters for this attempt, in trial order.
    fn build_candidates(&self, preference: &TransportPreference, try_web_sockets: bool) -> Vec<Arc<dyn Transport>> {
        let supported: Vec<String> = self
            .inner
            .registry
            .names()
            .into_iter()
            .filter(|name| try_web_sockets || name != transport::SOCKET)
            .collect();

        match preference {
            TransportPreference::Auto => supported
                .iter()
                .filter_map(|name| self.inner.registry.create(name))
                .collect(),
            TransportPreference::List(choices) => choices
                .iter()
                .filter_map(|choice| match choice {
                    TransportChoice::Instance(transport) => Some(Arc::clone(transport)),
                    TransportChoice::Named(name) if supported.contains(name) => self.inner.registry.create(name),
                    TransportChoice::Named(_) => None,
                })
                .collect(),
        }
    }

    /// Synchronous half of stop. Returns the abort request to run, if any.
    fn halt(&self, notify_server: bool) -> Option<BoxFuture<'static, ()>> {
        if self.state() == ConnectionState::Disconnected {
            return None;
        }
        if self.inner.halting.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.inner.cancel.lock().unwrap_or_else(PoisonError::into_inner).cancel();

        let transport = self.inner.transport.lock().unwrap_or_else(PoisonError::into_inner).take();
        let abort = match &transport {
            Some(transport) => {
                let abort = if notify_server { transport.abort(self) } else { None };
                self.inner.keep_alive.disarm();
                transport.stop(self);
                abort
            }
            None => {
                self.inner.keep_alive.disarm();
                None
            }
        };

        self.inner.events.publish(&ConnectionEvent::Disconnected);
        {
            let mut session = self.session();
            session.message_id = None;
            session.groups = None;
        }

        let pending = self.inner.attempt.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(attempt) = pending {
            resolve_attempt(&attempt, Err(ClientError::Stopped));
        }

        self.inner.state.change_from_current(&self.inner.events, ConnectionState::Disconnected);
        self.inner.halting.store(false, Ordering::SeqCst);
        self.log("stopped connection");
        abort
    }
}

// =============================================================================
// TRANSPORT PLUMBING
// =============================================================================

impl Connection {
    /// Emit `msg` as a debug line when connection logging is on.
    pub fn log(&self, msg: &str) {
        if self.inner.config.logging {
            tracing::debug!(connection = self.inner.key, "{msg}");
        }
    }

    pub(crate) fn publish(&self, event: &ConnectionEvent) {
        self.inner.events.publish(event);
    }

    pub(crate) fn raise_error(&self, err: ClientError) {
        self.inner.events.publish(&ConnectionEvent::Error(err));
    }

    pub(crate) fn raise_sending(&self) {
        self.inner.events.publish(&ConnectionEvent::Sending);
    }

    pub(crate) fn net(&self) -> &Net {
        &self.inner.net
    }

    pub(crate) fn http(&self) -> Option<Arc<dyn HttpClient>> {
        self.inner.net.http.clone()
    }

    pub(crate) fn keep_alive(&self) -> &KeepAliveMonitor {
        &self.inner.keep_alive
    }

    pub(crate) fn jsonp(&self) -> bool {
        self.session().jsonp
    }

    pub(crate) fn is_disconnecting(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }

    pub(crate) fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.transport.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Make `candidate` the connection's transport for the duration of its
    /// start attempt, so frames it delivers early are processed. Refused
    /// once the attempt's token has fired.
    pub(crate) fn install_transport(&self, candidate: Arc<dyn Transport>, attempt: &CancellationToken) -> bool {
        let _current = self.inner.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if attempt.is_cancelled() {
            return false;
        }
        *self.inner.transport.lock().unwrap_or_else(PoisonError::into_inner) = Some(candidate);
        true
    }

    /// Uninstall `candidate` if it is still the connection's transport.
    pub(crate) fn clear_transport(&self, candidate: &Arc<dyn Transport>) {
        let mut slot = self.inner.transport.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, candidate)) {
            slot.take();
        }
    }

    /// `Connecting -> Connected` for the attempt owning `attempt`.
    ///
    /// The token check and the swap happen under the lock `stop()` cancels
    /// with, so a stop (and any start after it) either lands first and the
    /// swap is refused, or lands after and sees `Connected`.
    pub(crate) fn finish_start(&self, attempt: &CancellationToken) -> bool {
        let swapped = {
            let _current = self.inner.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            !attempt.is_cancelled()
                && self
                    .inner
                    .state
                    .swap_if(ConnectionState::Connecting, ConnectionState::Connected)
        };
        if swapped {
            self.inner.events.publish(&ConnectionEvent::StateChanged {
                old: ConnectionState::Connecting,
                new: ConnectionState::Connected,
            });
        }
        swapped
    }

    pub(crate) fn change_state(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        self.inner.state.change(&self.inner.events, expected, next)
    }

    pub(crate) fn reset_message_id(&self) {
        self.session().message_id = None;
    }

    /// Connect URL for `transport`. Sockets use the socket-scheme base (or
    /// the server-advertised socket URL); everything else the HTTP base.
    pub(crate) fn transport_url(
        &self,
        transport: &str,
        reconnecting: bool,
        append_reconnect: bool,
    ) -> Result<String, ClientError> {
        let session = self.session();
        let (Some(endpoint), Some(connection_id)) = (&session.endpoint, &session.connection_id) else {
            return Err(ClientError::Transport("connection has not been negotiated".into()));
        };
        let prefix = if transport == transport::SOCKET {
            session.web_socket_server_url.as_deref().unwrap_or(&endpoint.socket_base)
        } else {
            &endpoint.base_url
        };
        let params = ConnectParams {
            transport,
            connection_id,
            connection_data: session.connection_data.as_deref(),
            reconnecting,
            append_reconnect,
            message_id: session.message_id.as_deref(),
            groups: session.groups.as_ref(),
            query: self.inner.query.as_deref(),
        };
        Ok(endpoint::connect_url(prefix, &session.app_relative_url, &params))
    }

    pub(crate) fn send_url(&self, transport: &str) -> Result<String, ClientError> {
        self.command_url(transport, endpoint::send_url)
    }

    pub(crate) fn abort_url(&self, transport: &str) -> Result<String, ClientError> {
        self.command_url(transport, endpoint::abort_url)
    }

    fn command_url(
        &self,
        transport: &str,
        build: fn(&str, &str, &str, Option<&str>) -> String,
    ) -> Result<String, ClientError> {
        let session = self.session();
        let (Some(endpoint), Some(connection_id)) = (&session.endpoint, &session.connection_id) else {
            return Err(ClientError::Transport("connection has not been negotiated".into()));
        };
        Ok(build(&endpoint.url, transport, connection_id, self.inner.query.as_deref()))
    }

    /// Handle one inbound frame: refresh keep-alive, honour `Disconnect`,
    /// publish each message, and record the resume cursor and groups.
    ///
    /// Returns the parsed frame, or `None` if there is no transport or the
    /// payload was malformed.
    pub(crate) fn process_frame(&self, payload: &Value) -> Option<Frame> {
        let transport = self.current_transport()?;
        if transport.supports_keep_alive() {
            self.inner.keep_alive.touch();
        }

        let frame = match Frame::from_value(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(connection = self.inner.key, error = %e, "dropping malformed frame");
                return None;
            }
        };

        if frame.disconnect {
            self.log("disconnect command received from server");
            self.halt(false);
            return Some(frame);
        }

        if let Some(messages) = &frame.messages {
            for message in messages {
                self.inner.events.publish(&ConnectionEvent::Received(message.clone()));
            }
        }

        let mut session = self.session();
        if let Some(cursor) = frame.cursor() {
            session.message_id = Some(cursor);
        }
        if let Some(transport_data) = &frame.transport_data {
            session.groups.clone_from(&transport_data.groups);
        }
        drop(session);
        Some(frame)
    }

    /// Enter (or stay in) `Reconnecting`. Returns `false` when the
    /// connection is neither connected nor already reconnecting.
    pub(crate) fn begin_reconnect(&self) -> bool {
        if self.state() == ConnectionState::Reconnecting {
            return true;
        }
        if self.change_state(ConnectionState::Connected, ConnectionState::Reconnecting) {
            self.log("connection lost, reconnecting");
            self.inner.events.publish(&ConnectionEvent::Reconnecting);
            return true;
        }
        false
    }

    /// Leave `Reconnecting`. Fires `Reconnected` at most once per episode.
    pub(crate) fn complete_reconnect(&self) -> bool {
        if !self.change_state(ConnectionState::Reconnecting, ConnectionState::Connected) {
            return false;
        }
        self.inner.keep_alive.touch();
        self.log("reconnected");
        self.inner.events.publish(&ConnectionEvent::Reconnected);
        true
    }

    /// Keep-alive timeout: report it and let the transport recover.
    pub(crate) fn handle_lost_connection(&self) {
        self.raise_error(ClientError::KeepAliveTimeout);
        let Some(transport) = self.current_transport() else {
            return;
        };
        if let Err(err) = transport.lost_connection(self) {
            self.raise_error(err);
        }
    }

    fn session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
