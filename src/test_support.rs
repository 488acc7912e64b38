//! Scripted network primitives and helpers shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{ClientError, NetError};
use crate::events::ConnectionEvent;
use crate::net::{
    EventSourceChannel, EventSourceConnector, EventSourceEvent, FrameChannel, FrameHandle, FrameHost, FrameSignal,
    HttpClient, HttpRequest, Net, SocketChannel, SocketCommand, SocketConnector, SocketEvent,
};
use crate::transport::Transport;

pub const TEST_URL: &str = "http://example.test/signalr";

/// Yield until spawned tasks have run their ready work.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub fn negotiate_body(keep_alive: Option<f64>, try_web_sockets: bool) -> String {
    json!({
        "Url": "/signalr",
        "ConnectionId": "c-1",
        "KeepAlive": keep_alive,
        "ProtocolVersion": "1.0",
        "TryWebSockets": try_web_sockets,
    })
    .to_string()
}

pub fn connection(net: Net) -> Connection {
    Connection::new(TEST_URL, ClientConfig::default(), net)
}

// =============================================================================
// HTTP
// =============================================================================

#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    Fail(NetError),
    /// Never completes.
    Hang,
    Delay(Duration, String),
}

struct Route {
    pattern: String,
    queue: VecDeque<Reply>,
    fallback: Option<Reply>,
}

/// HTTP client answering by URL substring. Each route serves its queued
/// replies in order, then its fallback; unknown URLs get a 404.
#[derive(Default)]
pub struct MockHttp {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, pattern: &str, reply: Reply) -> &Self {
        self.with_route(pattern, |route| route.queue.push_back(reply));
        self
    }

    pub fn always(&self, pattern: &str, reply: Reply) -> &Self {
        self.with_route(pattern, |route| route.fallback = Some(reply));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn requests_to(&self, pattern: &str) -> Vec<HttpRequest> {
        self.requests().into_iter().filter(|r| r.url.contains(pattern)).collect()
    }

    fn with_route(&self, pattern: &str, apply: impl FnOnce(&mut Route)) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(route) = routes.iter_mut().find(|r| r.pattern == pattern) {
            apply(route);
            return;
        }
        let mut route = Route { pattern: pattern.to_owned(), queue: VecDeque::new(), fallback: None };
        apply(&mut route);
        routes.push(route);
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        for route in routes.iter_mut().filter(|r| url.contains(&r.pattern)) {
            if let Some(reply) = route.queue.pop_front() {
                return reply;
            }
            if let Some(reply) = &route.fallback {
                return reply.clone();
            }
        }
        Reply::Fail(NetError::Status { status: 404, body: String::new() })
    }
}

#[async_trait::async_trait]
impl HttpClient for MockHttp {
    async fn request(&self, request: HttpRequest) -> Result<String, NetError> {
        let reply = self.next_reply(&request.url);
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request);
        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
            Reply::Delay(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
        }
    }
}

// =============================================================================
// SOCKET
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dial {
    Accept,
    Refuse,
    Hang,
}

/// Server side of an accepted fake socket.
pub struct SocketPeer {
    pub url: String,
    pub sent: mpsc::UnboundedReceiver<SocketCommand>,
    pub push: mpsc::UnboundedSender<SocketEvent>,
}

impl SocketPeer {
    pub fn message(&self, value: &Value) {
        let _ = self.push.send(SocketEvent::Message(value.to_string()));
    }

    pub fn close(&self, clean: bool) {
        let _ = self.push.send(SocketEvent::Closed { clean, reason: "test".into() });
    }
}

/// Socket connector whose dials follow a script; accepts by default.
#[derive(Default)]
pub struct FakeSockets {
    script: Mutex<VecDeque<Dial>>,
    peers: Mutex<VecDeque<SocketPeer>>,
    urls: Mutex<Vec<String>>,
}

impl FakeSockets {
    pub fn new(script: impl IntoIterator<Item = Dial>) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(script.into_iter().collect()), ..Self::default() })
    }

    pub fn take_peer(&self) -> Option<SocketPeer> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl SocketConnector for FakeSockets {
    async fn connect(&self, url: &str) -> Result<SocketChannel, NetError> {
        self.urls.lock().unwrap_or_else(PoisonError::into_inner).push(url.to_owned());
        let dial = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Dial::Accept);
        match dial {
            Dial::Refuse => Err(NetError::Request("connection refused".into())),
            Dial::Hang => std::future::pending().await,
            Dial::Accept => {
                let (outgoing, sent) = mpsc::unbounded_channel();
                let (push, incoming) = mpsc::unbounded_channel();
                self.peers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_back(SocketPeer { url: url.to_owned(), sent, push });
                Ok(SocketChannel { outgoing, incoming })
            }
        }
    }
}

// =============================================================================
// EVENT SOURCE
// =============================================================================

pub struct StreamPeer {
    pub url: String,
    pub push: mpsc::UnboundedSender<EventSourceEvent>,
    pub closer: CancellationToken,
}

impl StreamPeer {
    pub fn open(&self) {
        let _ = self.push.send(EventSourceEvent::Opened);
    }

    pub fn message(&self, data: &str) {
        let _ = self.push.send(EventSourceEvent::Message(data.to_owned()));
    }

    pub fn end(&self) {
        let _ = self.push.send(EventSourceEvent::Error { closed: true });
    }
}

#[derive(Default)]
pub struct FakeEventSource {
    peers: Mutex<VecDeque<StreamPeer>>,
    opened: AtomicUsize,
}

impl FakeEventSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take_peer(&self) -> Option<StreamPeer> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EventSourceConnector for FakeEventSource {
    async fn open(&self, url: &str) -> Result<EventSourceChannel, NetError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (push, incoming) = mpsc::unbounded_channel();
        let closer = CancellationToken::new();
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).push_back(StreamPeer {
            url: url.to_owned(),
            push,
            closer: closer.clone(),
        });
        Ok(EventSourceChannel { incoming, closer })
    }
}

// =============================================================================
// FRAME HOST
// =============================================================================

#[derive(Default)]
pub struct RecordingFrame {
    pub navigations: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

impl FrameHandle for RecordingFrame {
    fn navigate(&self, url: &str) {
        self.navigations.lock().unwrap_or_else(PoisonError::into_inner).push(url.to_owned());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FramePeer {
    pub url: String,
    pub frame: Arc<RecordingFrame>,
    pub push: mpsc::UnboundedSender<FrameSignal>,
}

#[derive(Default)]
pub struct FakeFrameHost {
    peers: Mutex<VecDeque<FramePeer>>,
}

impl FakeFrameHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take_peer(&self) -> Option<FramePeer> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }
}

impl FrameHost for FakeFrameHost {
    fn open(&self, url: &str) -> Result<FrameChannel, NetError> {
        let (push, signals) = mpsc::unbounded_channel();
        let frame = Arc::new(RecordingFrame::default());
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).push_back(FramePeer {
            url: url.to_owned(),
            frame: Arc::clone(&frame),
            push,
        });
        Ok(FrameChannel { handle: frame, signals })
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

#[derive(Debug, Clone)]
pub enum StartScript {
    Succeed,
    Fail(ClientError),
    Hang,
}

/// Transport that starts as scripted and records every call.
pub struct FakeTransport {
    name: String,
    script: StartScript,
    keep_alive: bool,
    lost: Option<ClientError>,
    pub calls: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new(name: &str, script: StartScript) -> Arc<Self> {
        Arc::new(Self::build(name, script, true, None))
    }

    pub fn build(name: &str, script: StartScript, keep_alive: bool, lost: Option<ClientError>) -> Self {
        Self {
            name: name.to_owned(),
            script,
            keep_alive,
            lost,
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call.to_owned());
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_keep_alive(&self) -> bool {
        self.keep_alive
    }

    async fn start(&self, _connection: &Connection) -> Result<(), ClientError> {
        self.record("start");
        match &self.script {
            StartScript::Succeed => Ok(()),
            StartScript::Fail(e) => Err(e.clone()),
            StartScript::Hang => std::future::pending().await,
        }
    }

    fn send(&self, _connection: &Connection, data: String) -> Result<(), ClientError> {
        self.record("send");
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(data);
        Ok(())
    }

    fn stop(&self, _connection: &Connection) {
        self.record("stop");
    }

    fn abort(&self, _connection: &Connection) -> Option<BoxFuture<'static, ()>> {
        self.record("abort");
        Some(async {}.boxed())
    }

    fn lost_connection(&self, _connection: &Connection) -> Result<(), ClientError> {
        self.record("lost_connection");
        match &self.lost {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Collects every event a connection publishes.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<ConnectionEvent>>>,
}

impl EventRecorder {
    pub fn attach(connection: &Connection) -> Self {
        let recorder = Self::default();
        let sink = Arc::clone(&recorder.events);
        connection.subscribe(move |event| {
            sink.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
        });
        recorder
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Event names, excluding `stateChanged` and `sending`.
    pub fn names(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .map(ConnectionEvent::name)
            .filter(|n| *n != "stateChanged" && *n != "sending")
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }

    pub fn received(&self) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEvent::Received(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ClientError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEvent::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }
}
