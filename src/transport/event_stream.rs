//! Server-push event stream transport. Sends go over HTTP.
//!
//! The stream must report `Opened` within `transport_connect_timeout`. Once
//! open, the end of the stream schedules a reopen from the last cursor after
//! `reconnect_delay`; a non-terminal error is only reported.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{EVENT_STREAM, Transport, common};
use crate::connection::{Connection, WeakConnection};
use crate::error::ClientError;
use crate::net::EventSourceEvent;
use crate::timer::TimerSlot;

/// Server sends this once the stream is wired up; it carries no frame.
const INITIALIZED: &str = "initialized";

struct ActiveStream {
    id: u64,
    closer: CancellationToken,
}

#[derive(Default)]
struct Inner {
    current_id: AtomicU64,
    active: Mutex<Option<ActiveStream>>,
    reconnect: TimerSlot,
}

#[derive(Clone, Default)]
pub struct EventStreamTransport {
    inner: Arc<Inner>,
}

impl EventStreamTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveStream>> {
        self.inner.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open(&self, connection: &Connection, reconnecting: bool) -> Result<(), ClientError> {
        let Some(connector) = connection.net().event_source.clone() else {
            return Err(ClientError::TransportUnavailable {
                transport: EVENT_STREAM.into(),
                reason: "no event source configured".into(),
            });
        };

        if self.close_stream() {
            connection.log("the connection already has an event source, stopping it");
        }
        connection.raise_sending();
        let url = connection.transport_url(EVENT_STREAM, reconnecting, false)?;
        connection.log(&format!("attempting to connect to event stream endpoint '{url}'"));

        let mut channel = match connector.open(&url).await {
            Ok(channel) => channel,
            Err(e) => {
                let err = ClientError::Transport(format!("event stream failed to open: {e}"));
                if reconnecting {
                    connection.raise_error(err.clone());
                    self.reconnect(connection);
                }
                return Err(err);
            }
        };

        let id = self.inner.current_id.fetch_add(1, Ordering::SeqCst) + 1;
        let closer = channel.closer.clone();
        *self.lock_active() = Some(ActiveStream { id, closer: closer.clone() });

        let timeout = connection.config().transport_connect_timeout;
        let opened = tokio::select! {
            biased;
            () = closer.cancelled() => return Err(ClientError::Stopped),
            opened = tokio::time::timeout(timeout, wait_opened(&mut channel.incoming)) => opened,
        };

        match opened {
            Ok(true) => {}
            Ok(false) => {
                self.clear_if_current(id);
                if reconnecting {
                    self.reconnect(connection);
                }
                return Err(ClientError::Transport("event stream closed before opening".into()));
            }
            Err(_) => {
                connection.log("event stream timed out trying to connect");
                self.close_stream();
                if reconnecting {
                    self.reconnect(connection);
                }
                return Err(ClientError::ConnectTimeout {
                    transport: EVENT_STREAM.into(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        connection.log("event stream connected");
        self.inner.reconnect.cancel_waiting();

        let transport = self.clone();
        let weak = connection.downgrade();
        let incoming = channel.incoming;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = closer.cancelled() => {}
                () = transport.read_loop(weak, id, incoming) => {}
            }
        });
        Ok(())
    }

    async fn read_loop(&self, weak: WeakConnection, id: u64, mut incoming: mpsc::UnboundedReceiver<EventSourceEvent>) {
        loop {
            let event = incoming.recv().await;
            if self.inner.current_id.load(Ordering::SeqCst) != id {
                return;
            }
            let Some(connection) = weak.upgrade() else {
                return;
            };
            match event {
                Some(EventSourceEvent::Message(data)) if data == INITIALIZED => {}
                Some(EventSourceEvent::Message(data)) => match serde_json::from_str::<Value>(&data) {
                    Ok(value) => {
                        connection.process_frame(&value);
                    }
                    Err(e) => {
                        tracing::warn!(connection = connection.key(), error = %e, "dropping unparsable event");
                    }
                },
                Some(EventSourceEvent::Opened) => {}
                Some(EventSourceEvent::Error { closed: false }) => {
                    connection.log("event stream error");
                    connection.raise_error(ClientError::Transport("event stream error".into()));
                }
                Some(EventSourceEvent::Error { closed: true }) | None => {
                    connection.log("event stream reconnecting due to the server connection ending");
                    self.reconnect(&connection);
                    return;
                }
            }
        }
    }

    fn reconnect(&self, connection: &Connection) {
        let transport = self.clone();
        let weak = connection.downgrade();
        self.inner.reconnect.schedule_if_idle(connection.config().reconnect_delay, async move {
            let Some(connection) = weak.upgrade() else {
                return;
            };
            transport.close_stream();
            if connection.begin_reconnect() {
                connection.log("event stream reconnecting");
                if transport.open(&connection, true).await.is_ok() {
                    connection.complete_reconnect();
                }
            }
        });
    }

    fn close_stream(&self) -> bool {
        match self.lock_active().take() {
            Some(stream) => {
                stream.closer.cancel();
                true
            }
            None => false,
        }
    }

    fn clear_if_current(&self, id: u64) {
        let mut active = self.lock_active();
        if let Some(stream) = active.as_ref().filter(|s| s.id == id) {
            stream.closer.cancel();
            active.take();
        }
    }
}

/// `true` once the stream opened, `false` if it failed or ended first.
async fn wait_opened(incoming: &mut mpsc::UnboundedReceiver<EventSourceEvent>) -> bool {
    loop {
        match incoming.recv().await {
            Some(EventSourceEvent::Opened) => return true,
            Some(EventSourceEvent::Error { .. }) | None => return false,
            Some(EventSourceEvent::Message(_)) => {}
        }
    }
}

#[async_trait::async_trait]
impl Transport for EventStreamTransport {
    fn name(&self) -> &str {
        EVENT_STREAM
    }

    fn supports_keep_alive(&self) -> bool {
        true
    }

    async fn start(&self, connection: &Connection) -> Result<(), ClientError> {
        self.open(connection, false).await
    }

    fn send(&self, connection: &Connection, data: String) -> Result<(), ClientError> {
        common::ajax_send(connection, EVENT_STREAM, data)
    }

    fn stop(&self, connection: &Connection) {
        self.inner.reconnect.cancel();
        if self.close_stream() {
            connection.log("event stream closed");
        }
    }

    fn abort(&self, connection: &Connection) -> Option<BoxFuture<'static, ()>> {
        common::ajax_abort(connection, EVENT_STREAM)
    }

    fn lost_connection(&self, connection: &Connection) -> Result<(), ClientError> {
        self.reconnect(connection);
        Ok(())
    }
}

#[cfg(test)]
#[path = "event_stream_test.rs"]
mod tests;
