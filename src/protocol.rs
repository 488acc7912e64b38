//! Wire types: negotiation response, persistent-connection frames, and hub
//! envelopes.
//!
//! Inbound types are parsed leniently: every field is optional, and a
//! `MessageId` or hub `Id` may arrive as a number or a string.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;

/// The only protocol version this client speaks.
pub const PROTOCOL_VERSION: &str = "1.0";

// =============================================================================
// NEGOTIATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiateResponse {
    /// App-relative URL transports connect to.
    pub url: String,
    pub connection_id: String,
    #[serde(default)]
    pub web_socket_server_url: Option<String>,
    /// Keep-alive interval in seconds; absent disables liveness checks.
    #[serde(default)]
    pub keep_alive: Option<f64>,
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub try_web_sockets: bool,
}

impl NegotiateResponse {
    /// # Errors
    ///
    /// Returns [`ClientError::Negotiation`] if the body is not a negotiation
    /// payload.
    pub fn parse(body: &str) -> Result<Self, ClientError> {
        serde_json::from_str(body).map_err(|e| ClientError::Negotiation(format!("unreadable response: {e}")))
    }

    /// # Errors
    ///
    /// Returns [`ClientError::ProtocolVersion`] unless the server reports
    /// exactly [`PROTOCOL_VERSION`].
    pub fn check_version(&self) -> Result<(), ClientError> {
        match self.protocol_version.as_deref() {
            Some(PROTOCOL_VERSION) => Ok(()),
            other => Err(ClientError::ProtocolVersion {
                expected: PROTOCOL_VERSION,
                actual: other.map(str::to_owned),
            }),
        }
    }
}

// =============================================================================
// PERSISTENT FRAMES
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransportData {
    #[serde(default)]
    pub groups: Option<Value>,
    /// Milliseconds a long-poll client waits before the next poll.
    #[serde(default)]
    pub long_poll_delay: Option<f64>,
}

/// One inbound envelope from a persistent-connection transport.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Frame {
    #[serde(default)]
    pub messages: Option<Vec<Value>>,
    #[serde(default)]
    pub message_id: Option<Value>,
    #[serde(default)]
    pub transport_data: Option<TransportData>,
    #[serde(default)]
    pub disconnect: bool,
    #[serde(default)]
    pub timed_out: bool,
}

impl Frame {
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] if a present field has the wrong
    /// shape.
    pub fn from_value(value: &Value) -> Result<Self, ClientError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Self::deserialize(value).map_err(|e| ClientError::Protocol(format!("malformed frame: {e}")))
    }

    /// Resume cursor as text.
    #[must_use]
    pub fn cursor(&self) -> Option<String> {
        self.message_id.as_ref().and_then(id_text)
    }

    /// Server-suggested delay before the next long poll, if positive.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn long_poll_delay_ms(&self) -> Option<u64> {
        let delay = self.transport_data.as_ref()?.long_poll_delay?;
        (delay.is_finite() && delay >= 1.0).then(|| delay as u64)
    }
}

/// Socket payloads are frames when they are `{}` or carry `Messages`.
/// Anything else is delivered to `received` directly.
#[must_use]
pub fn is_frame(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty() || map.contains_key("Messages"),
        _ => false,
    }
}

/// Text form of an id that may be a number or a string.
#[must_use]
pub fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// HUB ENVELOPES
// =============================================================================

/// Outgoing hub method call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubInvocation<'a> {
    pub hub: &'a str,
    pub method: &'a str,
    pub args: &'a [Value],
    pub state: &'a Map<String, Value>,
    pub id: u64,
}

/// Reply to a hub method call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HubResult {
    pub id: Value,
    #[serde(default)]
    pub state: Option<Map<String, Value>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

/// Server-initiated client method call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HubBroadcast {
    pub hub: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub state: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Result(HubResult),
    Broadcast(HubBroadcast),
}

impl HubMessage {
    /// Classify one received payload.
    ///
    /// Returns `Ok(None)` for payloads that are not hub traffic (not an
    /// object, or an object with neither `Id` nor `Hub`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] for hub traffic with missing or
    /// mistyped fields.
    pub fn parse(value: &Value) -> Result<Option<Self>, ClientError> {
        let Value::Object(map) = value else {
            return Ok(None);
        };
        if map.contains_key("Id") {
            let result = HubResult::deserialize(value)
                .map_err(|e| ClientError::Protocol(format!("malformed hub result: {e}")))?;
            return Ok(Some(Self::Result(result)));
        }
        if map.contains_key("Hub") {
            let broadcast = HubBroadcast::deserialize(value)
                .map_err(|e| ClientError::Protocol(format!("malformed hub invocation: {e}")))?;
            return Ok(Some(Self::Broadcast(broadcast)));
        }
        Ok(None)
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
