//! Pending hub invocations, correlated by callback id.
//!
//! DESIGN
//! ======
//! A registry is an explicit component rather than hidden global state. Each
//! [`HubConnection`](super::HubConnection) gets its own by default; hosts
//! that want one id space across several connections share an
//! `Arc<InvocationRegistry>` through `HubConnection::with_registry`.
//!
//! Entries are keyed by id and tagged with the owning connection's key, so a
//! shared registry never resolves one connection's call from another's
//! traffic. Every entry is removed exactly once: by its response, by
//! cancellation, or by the owning connection disconnecting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ClientError;

pub(crate) type Responder = oneshot::Sender<Result<Value, ClientError>>;

/// One outstanding call.
#[derive(Debug)]
pub(crate) struct PendingInvocation {
    pub connection: u64,
    /// Lowercased name of the calling hub, for merging returned state.
    pub hub: String,
    pub responder: Responder,
}

#[derive(Debug, Default)]
pub struct InvocationRegistry {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingInvocation>>,
}

impl InvocationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and park a responder under it.
    pub(crate) fn register(
        &self,
        connection: u64,
        hub: &str,
    ) -> (u64, oneshot::Receiver<Result<Value, ClientError>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (responder, rx) = oneshot::channel();
        self.lock().insert(id, PendingInvocation { connection, hub: hub.to_owned(), responder });
        (id, rx)
    }

    /// Remove the entry for `id` if `connection` owns it.
    pub(crate) fn take(&self, connection: u64, id: u64) -> Option<PendingInvocation> {
        let mut pending = self.lock();
        if pending.get(&id)?.connection != connection {
            return None;
        }
        pending.remove(&id)
    }

    /// Drop the entry for `id` without answering it.
    pub fn cancel(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Reject every call owned by `connection` with `err`. Returns how many
    /// were rejected.
    pub fn fail_connection(&self, connection: u64, err: &ClientError) -> usize {
        let failed: Vec<PendingInvocation> = {
            let mut pending = self.lock();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, entry)| entry.connection == connection)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        let count = failed.len();
        for entry in failed {
            let _ = entry.responder.send(Err(err.clone()));
        }
        count
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingInvocation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
