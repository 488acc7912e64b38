//! reqwest + eventsource-stream backed [`EventSourceConnector`].
//!
//! `open()` returns at once; a background task issues the request, reports
//! `Opened` when a success status arrives, forwards each event's `data`, and
//! ends with `Error { closed: true }` when the stream stops for any reason
//! other than the caller cancelling it.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{EventSourceChannel, EventSourceConnector, EventSourceEvent};
use crate::error::NetError;

pub struct ReqwestEventSource {
    http: reqwest::Client,
}

impl ReqwestEventSource {
    /// # Errors
    ///
    /// Returns [`NetError::Request`] if the TLS backend fails to initialize.
    pub fn new() -> Result<Self, NetError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| NetError::Request(e.to_string()))?;
        Ok(Self { http })
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl EventSourceConnector for ReqwestEventSource {
    async fn open(&self, url: &str) -> Result<EventSourceChannel, NetError> {
        let (events, incoming) = mpsc::unbounded_channel();
        let closer = CancellationToken::new();
        let request = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let token = closer.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = pump(request, events) => {}
            }
        });

        Ok(EventSourceChannel { incoming, closer })
    }
}

async fn pump(request: reqwest::RequestBuilder, events: mpsc::UnboundedSender<EventSourceEvent>) {
    let response = match request.send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            tracing::debug!(status = response.status().as_u16(), "event stream rejected");
            let _ = events.send(EventSourceEvent::Error { closed: true });
            return;
        }
        Err(e) => {
            tracing::debug!(error = %e, "event stream request failed");
            let _ = events.send(EventSourceEvent::Error { closed: true });
            return;
        }
    };

    if events.send(EventSourceEvent::Opened).is_err() {
        return;
    }

    let mut stream = response.bytes_stream().eventsource();
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                if events.send(EventSourceEvent::Message(event.data)).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "event stream read failed");
                break;
            }
        }
    }
    let _ = events.send(EventSourceEvent::Error { closed: true });
}
