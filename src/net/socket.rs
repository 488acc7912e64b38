//! tokio-tungstenite-backed [`SocketConnector`].
//!
//! The socket is split into a writer task fed by `SocketCommand`s and a
//! reader task that forwards text messages and ends with exactly one
//! `SocketEvent::Closed`.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{SocketChannel, SocketCommand, SocketConnector, SocketEvent};
use crate::error::NetError;

#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait::async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<SocketChannel, NetError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| NetError::Request(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (outgoing, mut commands) = mpsc::unbounded_channel::<SocketCommand>();
        let (events, incoming) = mpsc::unbounded_channel::<SocketEvent>();

        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    SocketCommand::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::debug!(error = %e, "socket write failed");
                            break;
                        }
                    }
                    SocketCommand::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            let closed = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(SocketEvent::Message(text.to_string())).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        break SocketEvent::Closed { clean: true, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SocketEvent::Closed { clean: false, reason: e.to_string() },
                    None => break SocketEvent::Closed { clean: false, reason: "connection reset".into() },
                }
            };
            let _ = events.send(closed);
        });

        Ok(SocketChannel { outgoing, incoming })
    }
}
