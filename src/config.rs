//! Connection tunables and start-time options.
//!
//! DESIGN
//! ======
//! `ClientConfig` carries every timing constant the engine uses. Defaults are
//! the protocol's stock values; `from_env()` overrides them from `HUBWIRE_*`
//! variables, falling back to the default on absent or unparsable values.
//!
//! Caller query parameters come in three shapes (pairs, a raw string, an
//! opaque scalar). All of them encode through [`QueryString::encode`] so the
//! negotiate, connect, send, and abort URLs carry identical text.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::ClientError;
use crate::transport::Transport;

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;
pub const DEFAULT_KEEP_ALIVE_TIMEOUT_COUNT: f64 = 2.0;
pub const DEFAULT_KEEP_ALIVE_WARN_AT: f64 = 2.0 / 3.0;
pub const DEFAULT_TRANSPORT_CONNECT_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_LONG_POLL_RECONNECT_DELAY_MS: u64 = 3000;
pub const DEFAULT_LONG_POLL_INITIAL_DELAY_MS: u64 = 250;
pub const DEFAULT_LONG_POLL_ASSUME_CONNECTED_MS: u64 = 150;
pub const DEFAULT_ABORT_TIMEOUT_MS: u64 = 1000;

// =============================================================================
// CLIENT CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Wait before a transport re-runs its connect after losing the session.
    pub reconnect_delay: Duration,
    /// Multiplier from the negotiated keep-alive interval to the lost timeout.
    pub keep_alive_timeout_count: f64,
    /// Fraction of the lost timeout at which the slow warning fires.
    pub keep_alive_warn_at: f64,
    /// Connect watchdog for the event-stream and frame-polling transports.
    pub transport_connect_timeout: Duration,
    /// Long polling: window after which a reconnect poll is announced as
    /// recovered even before its response arrives.
    pub long_poll_reconnect_delay: Duration,
    /// Long polling: delay before the first poll is issued.
    pub long_poll_initial_delay: Duration,
    /// Long polling: the transport reports connected after this much time
    /// even if the first poll is still outstanding.
    pub long_poll_assume_connected_after: Duration,
    /// Timeout for the best-effort abort request sent on stop.
    pub abort_timeout: Duration,
    /// Emit connection-scoped debug lines.
    pub logging: bool,
    /// Origin of the hosting environment. Relative connection URLs resolve
    /// against it, and a different target origin marks the session
    /// cross-origin. `None` means the session is never cross-origin.
    pub origin: Option<String>,
    /// Whether the host can make credentialed cross-origin requests. When it
    /// cannot, cross-origin sessions fall back to JSONP.
    pub supports_cross_origin: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            keep_alive_timeout_count: DEFAULT_KEEP_ALIVE_TIMEOUT_COUNT,
            keep_alive_warn_at: DEFAULT_KEEP_ALIVE_WARN_AT,
            transport_connect_timeout: Duration::from_millis(DEFAULT_TRANSPORT_CONNECT_TIMEOUT_MS),
            long_poll_reconnect_delay: Duration::from_millis(DEFAULT_LONG_POLL_RECONNECT_DELAY_MS),
            long_poll_initial_delay: Duration::from_millis(DEFAULT_LONG_POLL_INITIAL_DELAY_MS),
            long_poll_assume_connected_after: Duration::from_millis(DEFAULT_LONG_POLL_ASSUME_CONNECTED_MS),
            abort_timeout: Duration::from_millis(DEFAULT_ABORT_TIMEOUT_MS),
            logging: false,
            origin: None,
            supports_cross_origin: true,
        }
    }
}

impl ClientConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `HUBWIRE_RECONNECT_DELAY_MS`: default 2000
    /// - `HUBWIRE_KEEP_ALIVE_TIMEOUT_COUNT`: default 2
    /// - `HUBWIRE_KEEP_ALIVE_WARN_AT`: default 0.667
    /// - `HUBWIRE_TRANSPORT_CONNECT_TIMEOUT_MS`: default 3000
    /// - `HUBWIRE_LONG_POLL_RECONNECT_DELAY_MS`: default 3000
    /// - `HUBWIRE_LONG_POLL_INITIAL_DELAY_MS`: default 250
    /// - `HUBWIRE_LONG_POLL_ASSUME_CONNECTED_MS`: default 150
    /// - `HUBWIRE_ABORT_TIMEOUT_MS`: default 1000
    /// - `HUBWIRE_LOGGING`: `true`/`1` enables connection logging
    /// - `HUBWIRE_ORIGIN`: hosting origin, e.g. `https://app.example.com`
    /// - `HUBWIRE_SUPPORTS_CROSS_ORIGIN`: default true
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            reconnect_delay: env_millis("HUBWIRE_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS),
            keep_alive_timeout_count: env_parse("HUBWIRE_KEEP_ALIVE_TIMEOUT_COUNT", DEFAULT_KEEP_ALIVE_TIMEOUT_COUNT),
            keep_alive_warn_at: env_parse("HUBWIRE_KEEP_ALIVE_WARN_AT", DEFAULT_KEEP_ALIVE_WARN_AT),
            transport_connect_timeout: env_millis(
                "HUBWIRE_TRANSPORT_CONNECT_TIMEOUT_MS",
                DEFAULT_TRANSPORT_CONNECT_TIMEOUT_MS,
            ),
            long_poll_reconnect_delay: env_millis(
                "HUBWIRE_LONG_POLL_RECONNECT_DELAY_MS",
                DEFAULT_LONG_POLL_RECONNECT_DELAY_MS,
            ),
            long_poll_initial_delay: env_millis("HUBWIRE_LONG_POLL_INITIAL_DELAY_MS", DEFAULT_LONG_POLL_INITIAL_DELAY_MS),
            long_poll_assume_connected_after: env_millis(
                "HUBWIRE_LONG_POLL_ASSUME_CONNECTED_MS",
                DEFAULT_LONG_POLL_ASSUME_CONNECTED_MS,
            ),
            abort_timeout: env_millis("HUBWIRE_ABORT_TIMEOUT_MS", DEFAULT_ABORT_TIMEOUT_MS),
            logging: env_flag("HUBWIRE_LOGGING", false),
            origin: std::env::var("HUBWIRE_ORIGIN").ok().filter(|v| !v.trim().is_empty()),
            supports_cross_origin: env_flag("HUBWIRE_SUPPORTS_CROSS_ORIGIN", true),
        }
    }

    /// Reject values the keep-alive arithmetic cannot use.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.keep_alive_timeout_count.is_finite() && self.keep_alive_timeout_count > 0.0) {
            return Err(ClientError::Config(format!(
                "keep_alive_timeout_count must be positive, got {}",
                self.keep_alive_timeout_count
            )));
        }
        if !(self.keep_alive_warn_at > 0.0 && self.keep_alive_warn_at < 1.0) {
            return Err(ClientError::Config(format!(
                "keep_alive_warn_at must be between 0 and 1, got {}",
                self.keep_alive_warn_at
            )));
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_parse(key, default_ms))
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

// =============================================================================
// QUERY STRING
// =============================================================================

/// Caller-supplied query parameters appended to every request URL.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryString {
    /// Key/value pairs, form-encoded.
    Pairs(Vec<(String, String)>),
    /// Pre-encoded text appended as is.
    Raw(String),
    /// Opaque value; its text form is escaped.
    Scalar(Value),
}

impl QueryString {
    /// Pairs from a JSON object. Non-string values use their JSON text.
    #[must_use]
    pub fn from_object(object: &serde_json::Map<String, Value>) -> Self {
        let pairs = object
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect();
        Self::Pairs(pairs)
    }

    /// Encoded text without a leading separator, or `None` when empty.
    #[must_use]
    pub fn encode(&self) -> Option<String> {
        let encoded = match self {
            Self::Pairs(pairs) => {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (key, value) in pairs {
                    serializer.append_pair(key, value);
                }
                serializer.finish()
            }
            Self::Raw(raw) => raw.trim_start_matches(['?', '&']).to_owned(),
            Self::Scalar(value) => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                escape(&text)
            }
        };
        if encoded.is_empty() { None } else { Some(encoded) }
    }
}

impl From<&str> for QueryString {
    fn from(raw: &str) -> Self {
        Self::Raw(raw.to_owned())
    }
}

impl From<String> for QueryString {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

impl<K, V> From<Vec<(K, V)>> for QueryString
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        Self::Pairs(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Percent-encode a single query component.
pub(crate) fn escape(text: &str) -> String {
    url::form_urlencoded::byte_serialize(text.as_bytes()).collect()
}

// =============================================================================
// START OPTIONS
// =============================================================================

/// One entry of an explicit transport preference.
#[derive(Clone)]
pub enum TransportChoice {
    /// A registered transport, by wire name.
    Named(String),
    /// A caller-built adapter, tried as given.
    Instance(Arc<dyn Transport>),
}

impl TransportChoice {
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Named(name) => name.clone(),
            Self::Instance(transport) => transport.name().to_owned(),
        }
    }
}

impl std::fmt::Debug for TransportChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Instance(transport) => f.debug_tuple("Instance").field(&transport.name()).finish(),
        }
    }
}

/// Which transports `start()` may try, and in what order.
#[derive(Debug, Clone, Default)]
pub enum TransportPreference {
    /// Every server-supported registered transport, in registration order.
    #[default]
    Auto,
    /// Exactly these, in this order, filtered to what the server supports.
    List(Vec<TransportChoice>),
}

impl TransportPreference {
    /// Explicit list of wire names.
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(names.into_iter().map(|n| TransportChoice::Named(n.into())).collect())
    }

    #[must_use]
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

impl FromStr for TransportPreference {
    type Err = ClientError;

    /// `auto`, or a comma-separated list of wire names.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        let names: Vec<&str> = trimmed.split(',').map(str::trim).filter(|n| !n.is_empty()).collect();
        if names.is_empty() {
            return Err(ClientError::Config(format!("invalid transport list: {raw}")));
        }
        Ok(Self::named(names))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub transport: TransportPreference,
    /// Use JSONP-style requests: sends become `GET`, and unparsable send
    /// responses are tolerated.
    pub jsonp: bool,
}

impl StartOptions {
    #[must_use]
    pub fn with_transport(transport: TransportPreference) -> Self {
        Self { transport, ..Self::default() }
    }
}

// =============================================================================
// HUB OPTIONS
// =============================================================================

#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Append `/signalr` to the hub URL.
    pub use_default_path: bool,
    pub query: Option<QueryString>,
    pub config: ClientConfig,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self { use_default_path: true, query: None, config: ClientConfig::default() }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
