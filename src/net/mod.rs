//! Network primitives the transports drive.
//!
//! DESIGN
//! ======
//! Each primitive is a trait seam so the engine never depends on a concrete
//! HTTP, socket, or event-stream stack:
//! - [`HttpClient`]: one request, text response (negotiate, send, abort, poll)
//! - [`SocketConnector`]: duplex text socket as a pair of channels
//! - [`EventSourceConnector`]: server-push stream as a channel of events
//! - [`FrameHost`]: hidden long-lived document request (no stock impl)
//!
//! [`Net`] bundles whichever primitives the host provides. A transport whose
//! primitive is missing fails its start attempt at once, so fallback moves on.

pub mod event_source;
pub mod http;
pub mod socket;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::NetError;

pub use event_source::ReqwestEventSource;
pub use http::ReqwestHttpClient;
pub use socket::TungsteniteConnector;

// =============================================================================
// HTTP
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Form fields: the body of a `POST`, query parameters of a `GET`.
    pub form: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: HttpMethod::Get, url: url.into(), form: Vec::new(), timeout: None }
    }

    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self { method: HttpMethod::Post, url: url.into(), form: Vec::new(), timeout: None }
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform one request and return the response body.
    async fn request(&self, request: HttpRequest) -> Result<String, NetError>;
}

// =============================================================================
// SOCKET
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Text(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Message(String),
    /// Terminal. `clean` is false for errors and closes without a handshake.
    Closed { clean: bool, reason: String },
}

/// An open socket. Dropping `outgoing` closes it.
pub struct SocketChannel {
    pub outgoing: mpsc::UnboundedSender<SocketCommand>,
    pub incoming: mpsc::UnboundedReceiver<SocketEvent>,
}

#[async_trait::async_trait]
pub trait SocketConnector: Send + Sync {
    /// Open a socket. Resolves once the handshake completed.
    async fn connect(&self, url: &str) -> Result<SocketChannel, NetError>;
}

// =============================================================================
// EVENT SOURCE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSourceEvent {
    /// The stream is open and receiving.
    Opened,
    /// One `data` payload.
    Message(String),
    /// `closed` is true when the stream ended and will not resume.
    Error { closed: bool },
}

/// A stream being opened. `Opened` arrives on `incoming` once connected.
pub struct EventSourceChannel {
    pub incoming: mpsc::UnboundedReceiver<EventSourceEvent>,
    pub closer: CancellationToken,
}

#[async_trait::async_trait]
pub trait EventSourceConnector: Send + Sync {
    /// Begin opening a stream. Returns immediately; progress arrives as
    /// events.
    async fn open(&self, url: &str) -> Result<EventSourceChannel, NetError>;
}

// =============================================================================
// FRAME HOST
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameReadyState {
    Loading,
    Interactive,
    Loaded,
    Complete,
}

impl FrameReadyState {
    /// The underlying request ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Loaded | Self::Complete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSignal {
    /// The server script announced the connection is live.
    Started,
    /// One frame payload pushed by the server.
    Data(String),
    ReadyState(FrameReadyState),
}

pub trait FrameHandle: Send + Sync {
    /// Point the frame at a new URL (used to resume).
    fn navigate(&self, url: &str);
    fn close(&self);
}

pub struct FrameChannel {
    pub handle: Arc<dyn FrameHandle>,
    pub signals: mpsc::UnboundedReceiver<FrameSignal>,
}

pub trait FrameHost: Send + Sync {
    fn open(&self, url: &str) -> Result<FrameChannel, NetError>;
}

// =============================================================================
// NET
// =============================================================================

/// The primitives available to a connection.
#[derive(Clone, Default)]
pub struct Net {
    pub http: Option<Arc<dyn HttpClient>>,
    pub socket: Option<Arc<dyn SocketConnector>>,
    pub event_source: Option<Arc<dyn EventSourceConnector>>,
    pub frame_host: Option<Arc<dyn FrameHost>>,
}

impl Net {
    /// reqwest for HTTP and event streams, tokio-tungstenite for sockets.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Request`] if the HTTP client cannot be built.
    pub fn standard() -> Result<Self, NetError> {
        let http = ReqwestHttpClient::new()?;
        let event_source = ReqwestEventSource::with_client(http.client().clone());
        Ok(Self {
            http: Some(Arc::new(http)),
            socket: Some(Arc::new(TungsteniteConnector)),
            event_source: Some(Arc::new(event_source)),
            frame_host: None,
        })
    }

    #[must_use]
    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    #[must_use]
    pub fn with_socket(mut self, socket: Arc<dyn SocketConnector>) -> Self {
        self.socket = Some(socket);
        self
    }

    #[must_use]
    pub fn with_event_source(mut self, event_source: Arc<dyn EventSourceConnector>) -> Self {
        self.event_source = Some(event_source);
        self
    }

    #[must_use]
    pub fn with_frame_host(mut self, frame_host: Arc<dyn FrameHost>) -> Self {
        self.frame_host = Some(frame_host);
        self
    }
}

impl std::fmt::Debug for Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Net")
            .field("http", &self.http.is_some())
            .field("socket", &self.socket.is_some())
            .field("event_source", &self.event_source.is_some())
            .field("frame_host", &self.frame_host.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
