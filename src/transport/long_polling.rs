//! Repeated-request transport.
//!
//! DESIGN
//! ======
//! After `long_poll_initial_delay` a poll loop issues one `GET` at a time:
//!
//! ```text
//! poll --ok--> process frame --> [wait LongPollDelay] --> poll
//!   |                                 (raise_reconnect = TimedOut)
//!   +--error--> report --> wait reconnect_delay --> poll (raise_reconnect)
//! ```
//!
//! The first successful poll completes `start`; so does the passage of
//! `long_poll_assume_connected_after`, since a poll that is held open gives no
//! earlier signal. A poll issued with `raise_reconnect` moves the connection
//! to `Reconnecting`, and back to `Connected` either when it succeeds or when
//! `long_poll_reconnect_delay` passes without it failing.
//!
//! Inbound traffic is not continuous, so keep-alive monitoring is off and a
//! keep-alive timeout cannot be handled here.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{LONG_POLLING, Transport, common};
use crate::connection::{Connection, WeakConnection};
use crate::error::{ClientError, NetError};
use crate::net::HttpRequest;
use crate::timer::TimerSlot;

/// Fires the start signal once, from whichever path gets there first.
struct InitialConnect(Mutex<Option<oneshot::Sender<()>>>);

impl InitialConnect {
    fn fire(&self) {
        if let Some(tx) = self.0.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Default)]
struct Inner {
    token: Mutex<Option<CancellationToken>>,
    announce: TimerSlot,
}

#[derive(Clone, Default)]
pub struct LongPollingTransport {
    inner: Arc<Inner>,
}

impl LongPollingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cancel_polling(&self) -> bool {
        match self.inner.token.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn poll_loop(&self, weak: WeakConnection, initial: Arc<InitialConnect>) {
        let mut raise_reconnect = false;
        loop {
            let Some(connection) = weak.upgrade() else {
                return;
            };
            let Some(http) = connection.http() else {
                return;
            };

            connection.raise_sending();
            let reconnecting = connection.message_id().is_some();
            let url = match connection.transport_url(LONG_POLLING, reconnecting, raise_reconnect) {
                Ok(url) => url,
                Err(e) => {
                    connection.raise_error(e);
                    return;
                }
            };

            if reconnecting && raise_reconnect && !connection.begin_reconnect() {
                return;
            }
            connection.log(&format!("attempting to connect to '{url}' using longPolling"));

            if raise_reconnect {
                let weak = weak.clone();
                self.inner.announce.schedule(connection.config().long_poll_reconnect_delay, async move {
                    if let Some(connection) = weak.upgrade() {
                        connection.complete_reconnect();
                    }
                });
            }

            drop(connection);
            let response = http.request(HttpRequest::get(url)).await;
            let Some(connection) = weak.upgrade() else {
                return;
            };

            let payload = match response {
                Ok(body) if body.trim().is_empty() => Ok(Value::Null),
                Ok(body) => serde_json::from_str::<Value>(&body).map_err(|e| format!("invalid poll response: {e}")),
                Err(NetError::Cancelled) => {
                    connection.log("aborted poll request");
                    return;
                }
                Err(e) => Err(e.to_string()),
            };

            match payload {
                Ok(payload) => {
                    initial.fire();
                    if raise_reconnect {
                        self.inner.announce.cancel_waiting();
                        connection.complete_reconnect();
                    }

                    let frame = connection.process_frame(&payload).unwrap_or_default();
                    if frame.disconnect || connection.is_disconnecting() {
                        return;
                    }
                    raise_reconnect = frame.timed_out;
                    if let Some(delay) = frame.long_poll_delay_ms() {
                        drop(connection);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
                Err(reason) => {
                    connection.log(&format!("an error occurred using longPolling: {reason}"));
                    self.inner.announce.cancel_waiting();
                    connection.raise_error(ClientError::Transport(reason));

                    let delay = connection.config().reconnect_delay;
                    drop(connection);
                    tokio::time::sleep(delay).await;
                    match weak.upgrade() {
                        Some(connection) if !connection.is_disconnecting() => {}
                        _ => return,
                    }
                    raise_reconnect = true;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for LongPollingTransport {
    fn name(&self) -> &str {
        LONG_POLLING
    }

    fn supports_keep_alive(&self) -> bool {
        false
    }

    async fn start(&self, connection: &Connection) -> Result<(), ClientError> {
        if connection.http().is_none() {
            return Err(ClientError::TransportUnavailable {
                transport: LONG_POLLING.into(),
                reason: "no http client configured".into(),
            });
        }
        if self.cancel_polling() {
            connection.log("polling requests already exist, aborting");
        }
        connection.reset_message_id();

        let token = CancellationToken::new();
        *self.inner.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());

        let (connected_tx, connected_rx) = oneshot::channel();
        let initial = Arc::new(InitialConnect(Mutex::new(Some(connected_tx))));
        let config = connection.config();
        let (initial_delay, assume_after) = (config.long_poll_initial_delay, config.long_poll_assume_connected_after);

        let transport = self.clone();
        let weak = connection.downgrade();
        let task_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = task_token.cancelled() => {}
                () = async {
                    tokio::time::sleep(initial_delay).await;
                    let assume = {
                        let initial = Arc::clone(&initial);
                        async move {
                            tokio::time::sleep(assume_after).await;
                            initial.fire();
                        }
                    };
                    tokio::join!(transport.poll_loop(weak, initial), assume);
                } => {}
            }
        });

        tokio::select! {
            biased;
            () = token.cancelled() => Err(ClientError::Stopped),
            connected = connected_rx => connected.map_err(|_| ClientError::Stopped),
        }
    }

    fn send(&self, connection: &Connection, data: String) -> Result<(), ClientError> {
        common::ajax_send(connection, LONG_POLLING, data)
    }

    fn stop(&self, connection: &Connection) {
        self.inner.announce.cancel();
        if self.cancel_polling() {
            connection.log("stopped polling");
        }
    }

    fn abort(&self, connection: &Connection) -> Option<BoxFuture<'static, ()>> {
        common::ajax_abort(connection, LONG_POLLING)
    }

    fn lost_connection(&self, _connection: &Connection) -> Result<(), ClientError> {
        Err(ClientError::UnsupportedOperation(
            "lost connection is not handled for long polling".into(),
        ))
    }
}

#[cfg(test)]
#[path = "long_polling_test.rs"]
mod tests;
