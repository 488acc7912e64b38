//! Error taxonomy for the connection engine and its network primitives.
//!
//! DESIGN
//! ======
//! `ClientError` is `Clone` because one failure fans out to several places:
//! the `error` event, the rejected `start()` future, and any caller that
//! joined that start attempt. Underlying causes are captured as strings.
//!
//! `NetError` is what the external primitives (HTTP, socket, event stream,
//! frame host) report. Transports translate it into `ClientError`.

use crate::state::ConnectionState;

// =============================================================================
// CLIENT ERROR
// =============================================================================

/// Errors produced by connection, transport, and hub operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The connection URL could not be resolved to an absolute endpoint.
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),

    /// The negotiation request failed or returned an unreadable payload.
    #[error("error during negotiation request: {0}")]
    Negotiation(String),

    /// The server speaks a protocol version this client does not support.
    #[error("incompatible protocol version: expected {expected}, server reported {}", .actual.as_deref().unwrap_or("none"))]
    ProtocolVersion { expected: &'static str, actual: Option<String> },

    /// Every candidate transport failed to start.
    #[error("no transport could be initialized successfully; try specifying a different transport or none at all for auto initialization")]
    NoTransport,

    /// A transport cannot run in this environment (its primitive is missing).
    #[error("transport {transport} is unavailable: {reason}")]
    TransportUnavailable { transport: String, reason: String },

    /// A transport did not open within its connect window.
    #[error("transport {transport} timed out after {timeout_ms}ms while connecting")]
    ConnectTimeout { transport: String, timeout_ms: u64 },

    /// Mid-session transport failure (socket error, unclean close, poll error).
    #[error("transport error: {0}")]
    Transport(String),

    /// No keep-alive arrived within the negotiated timeout.
    #[error("keep alive timed out; connection considered lost")]
    KeepAliveTimeout,

    /// The operation is not supported by the active transport.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The server-side hub method raised an exception.
    #[error("{message}")]
    Invocation { message: String },

    /// `send()` was called while the connection was not connected.
    #[error("{}", send_precondition_message(.state))]
    SendPrecondition { state: ConnectionState },

    /// An inbound payload violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An outbound payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The operation was cancelled by `stop()`.
    #[error("connection was stopped")]
    Stopped,

    /// A configuration value is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

fn send_precondition_message(state: &ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => {
            "connection must be started before data can be sent; call start() before send()"
        }
        ConnectionState::Connecting => {
            "connection has not been fully initialized; wait for start() to complete before sending"
        }
        ConnectionState::Reconnecting => "connection is reconnecting; data cannot be sent until it is restored",
        ConnectionState::Connected => "connection is connected",
    }
}

impl ClientError {
    /// Grepable error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "E_INVALID_URL",
            Self::Negotiation(_) => "E_NEGOTIATION",
            Self::ProtocolVersion { .. } => "E_PROTOCOL_VERSION",
            Self::NoTransport => "E_NO_TRANSPORT",
            Self::TransportUnavailable { .. } => "E_TRANSPORT_UNAVAILABLE",
            Self::ConnectTimeout { .. } => "E_CONNECT_TIMEOUT",
            Self::Transport(_) => "E_TRANSPORT",
            Self::KeepAliveTimeout => "E_KEEP_ALIVE_TIMEOUT",
            Self::UnsupportedOperation(_) => "E_UNSUPPORTED_OPERATION",
            Self::Invocation { .. } => "E_INVOCATION",
            Self::SendPrecondition { .. } => "E_SEND_PRECONDITION",
            Self::Protocol(_) => "E_PROTOCOL",
            Self::Serialization(_) => "E_SERIALIZATION",
            Self::Stopped => "E_STOPPED",
            Self::Config(_) => "E_CONFIG",
        }
    }

    /// Whether the connection recovers from this fault without caller action.
    ///
    /// Runtime transport faults and keep-alive timeouts drive reconnection;
    /// everything else is either fatal to `start()` or local to one call.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::KeepAliveTimeout)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// NET ERROR
// =============================================================================

/// Failures reported by the network primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
    /// The request or connection could not be made.
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The request was cancelled locally.
    #[error("request was cancelled")]
    Cancelled,

    /// The underlying channel closed.
    #[error("channel closed")]
    Closed,
}

impl From<reqwest::Error> for NetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        Self::Request(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
