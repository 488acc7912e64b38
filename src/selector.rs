//! Sequential transport fallback.
//!
//! Candidates are tried one at a time in order, for as long as the start
//! attempt's token is live. A candidate is installed as
//! the connection's transport before its `start` runs, so frames it delivers
//! during connect are processed. On failure it is stopped and uninstalled
//! before the next candidate starts; at most one is ever live. Installing a
//! candidate and promoting the connection to `Connected` are both refused
//! once the attempt's token has fired.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::error::ClientError;
use crate::events::ConnectionEvent;
use crate::transport::{PRIVATE_PREFIX, Transport};

#[derive(Clone)]
pub enum Selection {
    Started(Arc<dyn Transport>),
    /// Every candidate failed (or there were none).
    Exhausted,
    /// The attempt was stopped while a candidate was connecting.
    Superseded,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started(transport) => f.debug_tuple("Started").field(&transport.name()).finish(),
            Self::Exhausted => f.write_str("Exhausted"),
            Self::Superseded => f.write_str("Superseded"),
        }
    }
}

/// Try `candidates` in order until one starts or `cancel` fires.
pub async fn initialize(
    connection: &Connection,
    candidates: Vec<Arc<dyn Transport>>,
    cancel: &CancellationToken,
) -> Selection {
    for candidate in candidates {
        if candidate.name().starts_with(PRIVATE_PREFIX) {
            continue;
        }
        if !connection.install_transport(Arc::clone(&candidate), cancel) {
            return Selection::Superseded;
        }
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ClientError::Stopped),
            result = candidate.start(connection) => result,
        };

        if cancel.is_cancelled() {
            candidate.stop(connection);
            return Selection::Superseded;
        }

        match result {
            Ok(()) => {
                if !connection.finish_start(cancel) {
                    candidate.stop(connection);
                    connection.clear_transport(&candidate);
                    return Selection::Superseded;
                }
                if candidate.supports_keep_alive() {
                    connection.keep_alive().arm(connection);
                }
                connection.publish(&ConnectionEvent::Started);
                connection.log(&format!("{} transport selected", candidate.name()));
                return Selection::Started(candidate);
            }
            Err(e) => {
                connection.log(&format!("{} transport failed: {e}", candidate.name()));
                candidate.stop(connection);
                connection.clear_transport(&candidate);
            }
        }
    }
    Selection::Exhausted
}
