//! Cancellable one-shot timers.
//!
//! A [`TimerSlot`] holds at most one pending timer. Scheduling into an
//! occupied slot cancels the timer that has not fired yet; [`TimerSlot::cancel`]
//! cancels whatever is there, including a callback that is mid-flight (it is
//! dropped at its next await point). Dropping the slot cancels it too.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

struct Pending {
    id: u64,
    token: CancellationToken,
    fired: bool,
}

#[derive(Default)]
pub struct TimerSlot {
    next_id: AtomicU64,
    current: Arc<Mutex<Option<Pending>>>,
}

impl TimerSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any timer that has not fired.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = current.replace(Pending { id, token: token.clone(), fired: false }) {
                // A fired callback may be the caller rescheduling itself.
                if !previous.fired {
                    previous.token.cancel();
                }
            }
        }

        let slot = Arc::clone(&self.current);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = async {
                    tokio::time::sleep(delay).await;
                    if let Some(pending) = slot
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .as_mut()
                        .filter(|p| p.id == id)
                    {
                        pending.fired = true;
                    }
                    task.await;
                } => {}
            }
        });
    }

    /// Like [`schedule`](Self::schedule), but a timer that is still waiting
    /// wins. Returns `false` when the new timer was not scheduled.
    pub fn schedule_if_idle<F>(&self, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_waiting() {
            return false;
        }
        self.schedule(delay, task);
        true
    }

    /// A timer is scheduled and has not fired yet.
    pub fn is_waiting(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|p| !p.fired && !p.token.is_cancelled())
    }

    /// Cancel the timer only if it has not fired. A callback already running
    /// is left alone.
    pub fn cancel_waiting(&self) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|p| !p.fired) {
            if let Some(pending) = current.take() {
                pending.token.cancel();
            }
            return true;
        }
        false
    }

    /// Cancel the timer in the slot. Returns `true` if one was present.
    pub fn cancel(&self) -> bool {
        let taken = self.current.lock().unwrap_or_else(PoisonError::into_inner).take();
        match taken {
            Some(pending) => {
                pending.token.cancel();
                true
            }
            None => false,
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "timer_test.rs"]
mod tests;
