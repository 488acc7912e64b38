//! Full-duplex socket transport.
//!
//! DESIGN
//! ======
//! Each opened socket gets a fresh id. Events from a socket whose id is no
//! longer current are ignored, so a late close from an expired socket cannot
//! trigger a second recovery. Any close of an established socket (and any
//! failed reopen) schedules one reopen after `reconnect_delay`; a reopen
//! already waiting absorbs further requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{SOCKET, Transport};
use crate::connection::{Connection, WeakConnection};
use crate::error::ClientError;
use crate::events::ConnectionEvent;
use crate::net::{SocketCommand, SocketEvent};
use crate::protocol;
use crate::timer::TimerSlot;

struct ActiveSocket {
    id: u64,
    outgoing: Option<mpsc::UnboundedSender<SocketCommand>>,
    token: CancellationToken,
}

#[derive(Default)]
struct Inner {
    current_id: AtomicU64,
    active: Mutex<Option<ActiveSocket>>,
    reconnect: TimerSlot,
}

#[derive(Clone, Default)]
pub struct SocketTransport {
    inner: Arc<Inner>,
}

impl SocketTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSocket>> {
        self.inner.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect a new socket. `reconnecting` builds the resume URL.
    async fn open(&self, connection: &Connection, reconnecting: bool) -> Result<(), ClientError> {
        let Some(connector) = connection.net().socket.clone() else {
            return Err(ClientError::TransportUnavailable {
                transport: SOCKET.into(),
                reason: "no socket connector configured".into(),
            });
        };

        self.close_socket(connection);
        connection.raise_sending();
        let url = connection.transport_url(SOCKET, reconnecting, false)?;
        connection.log(&format!("connecting to websocket endpoint '{url}'"));

        let id = self.inner.current_id.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *self.lock_active() = Some(ActiveSocket { id, outgoing: None, token: token.clone() });

        let dialed = tokio::select! {
            biased;
            () = token.cancelled() => return Err(ClientError::Stopped),
            dialed = connector.connect(&url) => dialed,
        };

        let channel = match dialed {
            Ok(channel) => channel,
            Err(e) => {
                self.clear_if_current(id);
                if reconnecting {
                    self.reconnect(connection);
                }
                return Err(ClientError::Transport(format!("websocket connect failed: {e}")));
            }
        };

        {
            let mut active = self.lock_active();
            match active.as_mut() {
                Some(socket) if socket.id == id => socket.outgoing = Some(channel.outgoing),
                _ => return Err(ClientError::Stopped),
            }
        }
        connection.log("websocket opened");

        let transport = self.clone();
        let weak = connection.downgrade();
        let incoming = channel.incoming;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = transport.read_loop(weak, id, incoming) => {}
            }
        });
        Ok(())
    }

    async fn read_loop(&self, weak: WeakConnection, id: u64, mut incoming: mpsc::UnboundedReceiver<SocketEvent>) {
        loop {
            let event = incoming.recv().await;
            if self.inner.current_id.load(Ordering::SeqCst) != id {
                return;
            }
            let Some(connection) = weak.upgrade() else {
                return;
            };
            match event {
                Some(SocketEvent::Message(text)) => dispatch(&connection, &text),
                Some(SocketEvent::Closed { clean, reason }) => {
                    if clean {
                        connection.log("websocket closed");
                    } else {
                        connection.log(&format!("unclean disconnect from websocket: {reason}"));
                        connection.raise_error(ClientError::Transport(format!("unclean disconnect: {reason}")));
                    }
                    self.clear_if_current(id);
                    self.reconnect(&connection);
                    return;
                }
                None => {
                    self.clear_if_current(id);
                    self.reconnect(&connection);
                    return;
                }
            }
        }
    }

    /// Schedule one reopen after `reconnect_delay`.
    fn reconnect(&self, connection: &Connection) {
        let transport = self.clone();
        let weak = connection.downgrade();
        self.inner.reconnect.schedule_if_idle(connection.config().reconnect_delay, async move {
            let Some(connection) = weak.upgrade() else {
                return;
            };
            transport.close_socket(&connection);
            if connection.begin_reconnect() {
                connection.log("websocket reconnecting");
                if transport.open(&connection, true).await.is_ok() {
                    connection.complete_reconnect();
                }
            }
        });
    }

    fn close_socket(&self, connection: &Connection) {
        let Some(socket) = self.lock_active().take() else {
            return;
        };
        connection.log("closing the websocket");
        if let Some(outgoing) = socket.outgoing {
            let _ = outgoing.send(SocketCommand::Close);
        }
        socket.token.cancel();
    }

    fn clear_if_current(&self, id: u64) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|s| s.id == id) {
            active.take();
        }
    }
}

/// Route one socket message: frames go through frame processing; any other
/// payload (hub results included) is published as-is.
fn dispatch(connection: &Connection, text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Null) => {}
        Ok(value) if protocol::is_frame(&value) => {
            connection.process_frame(&value);
        }
        Ok(value) => connection.publish(&ConnectionEvent::Received(value)),
        Err(e) => tracing::warn!(connection = connection.key(), error = %e, "dropping unparsable socket message"),
    }
}

#[async_trait::async_trait]
impl Transport for SocketTransport {
    fn name(&self) -> &str {
        SOCKET
    }

    fn supports_keep_alive(&self) -> bool {
        true
    }

    async fn start(&self, connection: &Connection) -> Result<(), ClientError> {
        self.open(connection, false).await
    }

    fn send(&self, _connection: &Connection, data: String) -> Result<(), ClientError> {
        let active = self.lock_active();
        let Some(outgoing) = active.as_ref().and_then(|s| s.outgoing.as_ref()) else {
            return Err(ClientError::Transport("websocket is not open".into()));
        };
        outgoing
            .send(SocketCommand::Text(data))
            .map_err(|_| ClientError::Transport("websocket is closed".into()))
    }

    fn stop(&self, connection: &Connection) {
        self.inner.reconnect.cancel();
        self.close_socket(connection);
    }

    fn abort(&self, _connection: &Connection) -> Option<BoxFuture<'static, ()>> {
        None
    }

    fn lost_connection(&self, connection: &Connection) -> Result<(), ClientError> {
        self.reconnect(connection);
        Ok(())
    }
}

#[cfg(test)]
#[path = "socket_test.rs"]
mod tests;
