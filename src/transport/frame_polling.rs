//! Hidden long-lived document transport. Sends go over HTTP.
//!
//! Only used when the host has no event-stream support. The frame's server
//! script signals `Started` once live; the first such signal completes
//! `start`, later ones complete a reconnect. When the frame's request ends
//! the frame is renavigated to the resume URL after `reconnect_delay`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{FRAME_POLLING, Transport, common};
use crate::connection::{Connection, WeakConnection};
use crate::error::ClientError;
use crate::net::{FrameHandle, FrameSignal};
use crate::timer::TimerSlot;

/// Frame ids are unique across every connection in the process.
static FRAME_COUNT: AtomicU64 = AtomicU64::new(0);

struct ActiveFrame {
    frame_id: u64,
    handle: Arc<dyn FrameHandle>,
    token: CancellationToken,
}

#[derive(Default)]
struct Inner {
    active: Mutex<Option<ActiveFrame>>,
    pending_start: Mutex<Option<oneshot::Sender<()>>>,
    reconnect: TimerSlot,
}

#[derive(Clone, Default)]
pub struct FramePollingTransport {
    inner: Arc<Inner>,
}

impl FramePollingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveFrame>> {
        self.inner.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn signal_loop(&self, weak: WeakConnection, mut signals: mpsc::UnboundedReceiver<FrameSignal>) {
        while let Some(signal) = signals.recv().await {
            let Some(connection) = weak.upgrade() else {
                return;
            };
            match signal {
                FrameSignal::Started => {
                    let pending = self.inner.pending_start.lock().unwrap_or_else(PoisonError::into_inner).take();
                    match pending {
                        Some(start) => {
                            let _ = start.send(());
                        }
                        None => {
                            connection.complete_reconnect();
                        }
                    }
                }
                FrameSignal::Data(text) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => {
                        connection.process_frame(&value);
                    }
                    Err(e) => {
                        tracing::warn!(connection = connection.key(), error = %e, "dropping unparsable frame data");
                    }
                },
                FrameSignal::ReadyState(ready) if ready.is_terminal() => {
                    connection.log(&format!("forever frame readyState changed to {ready:?}, reconnecting"));
                    self.reconnect(&connection);
                }
                FrameSignal::ReadyState(_) => {}
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
            let Some((frame_id, handle)) = transport
                .lock_active()
                .as_ref()
                .map(|f| (f.frame_id, Arc::clone(&f.handle)))
            else {
                return;
            };
            if !connection.begin_reconnect() {
                return;
            }
            match connection.transport_url(FRAME_POLLING, true, false) {
                Ok(url) => {
                    let url = format!("{url}&frameId={frame_id}");
                    connection.log(&format!("updating frame src to '{url}'"));
                    handle.navigate(&url);
                }
                Err(e) => connection.raise_error(e),
            }
        });
    }

    fn close_frame(&self) -> bool {
        let Some(frame) = self.lock_active().take() else {
            return false;
        };
        frame.token.cancel();
        frame.handle.close();
        true
    }
}

#[async_trait::async_trait]
impl Transport for FramePollingTransport {
    fn name(&self) -> &str {
        FRAME_POLLING
    }

    fn supports_keep_alive(&self) -> bool {
        true
    }

    async fn start(&self, connection: &Connection) -> Result<(), ClientError> {
        if connection.net().event_source.is_some() {
            connection.log("host supports event streams, skipping forever frame");
            return Err(ClientError::TransportUnavailable {
                transport: FRAME_POLLING.into(),
                reason: "event streams are available".into(),
            });
        }
        let Some(host) = connection.net().frame_host.clone() else {
            return Err(ClientError::TransportUnavailable {
                transport: FRAME_POLLING.into(),
                reason: "no frame host configured".into(),
            });
        };

        let frame_id = FRAME_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
        connection.raise_sending();
        let url = format!("{}&frameId={frame_id}", connection.transport_url(FRAME_POLLING, false, false)?);

        let channel = host
            .open(&url)
            .map_err(|e| ClientError::Transport(format!("forever frame failed to open: {e}")))?;

        let (started_tx, started_rx) = oneshot::channel();
        *self.inner.pending_start.lock().unwrap_or_else(PoisonError::into_inner) = Some(started_tx);
        let token = CancellationToken::new();
        self.close_frame();
        *self.lock_active() = Some(ActiveFrame { frame_id, handle: channel.handle, token: token.clone() });

        let transport = self.clone();
        let weak = connection.downgrade();
        let signals = channel.signals;
        let loop_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = loop_token.cancelled() => {}
                () = transport.signal_loop(weak, signals) => {}
            }
        });

        let timeout = connection.config().transport_connect_timeout;
        let started = tokio::select! {
            biased;
            () = token.cancelled() => return Err(ClientError::Stopped),
            started = tokio::time::timeout(timeout, started_rx) => started,
        };
        match started {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Stopped),
            Err(_) => {
                connection.log(&format!(
                    "failed to connect using forever frame source, it timed out after {}ms",
                    timeout.as_millis()
                ));
                self.inner.pending_start.lock().unwrap_or_else(PoisonError::into_inner).take();
                self.close_frame();
                Err(ClientError::ConnectTimeout {
                    transport: FRAME_POLLING.into(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    fn send(&self, connection: &Connection, data: String) -> Result<(), ClientError> {
        common::ajax_send(connection, FRAME_POLLING, data)
    }

    fn stop(&self, connection: &Connection) {
        self.inner.reconnect.cancel();
        self.inner.pending_start.lock().unwrap_or_else(PoisonError::into_inner).take();
        if self.close_frame() {
            connection.log("stopping forever frame");
        }
    }

    fn abort(&self, connection: &Connection) -> Option<BoxFuture<'static, ()>> {
        common::ajax_abort(connection, FRAME_POLLING)
    }

    fn lost_connection(&self, connection: &Connection) -> Result<(), ClientError> {
        self.reconnect(connection);
        Ok(())
    }
}

#[cfg(test)]
#[path = "frame_polling_test.rs"]
mod tests;
