//! Keep-alive liveness monitor.
//!
//! DESIGN
//! ======
//! Negotiation yields an interval `I` (seconds). From it:
//! - `timeout = I * 1000 * keep_alive_timeout_count` ms (default count 2)
//! - `timeout_warning = timeout * keep_alive_warn_at` (default 2/3)
//! - `check_interval = (timeout - timeout_warning) / 3`
//!
//! While monitoring, a check runs every `check_interval`. Liveness is only
//! evaluated while the connection is `Connected`: past `timeout` the active
//! transport's lost-connection hook runs; past `timeout_warning` a single
//! `ConnectionSlow` fires per silence episode; otherwise the episode resets.
//! The lost-connection hook also runs at most once per episode; a fresh
//! keep-alive (or re-arming) opens the next one.
//!
//! The check loop holds a weak connection handle and a cancellation token,
//! so `disarm()` (or dropping the connection) ends it.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, WeakConnection};
use crate::events::ConnectionEvent;
use crate::state::ConnectionState;

// =============================================================================
// SETTINGS
// =============================================================================

/// Derived keep-alive thresholds, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeepAliveSettings {
    pub timeout_ms: f64,
    pub timeout_warning_ms: f64,
    pub check_interval_ms: f64,
}

impl KeepAliveSettings {
    #[must_use]
    pub fn from_interval(interval_secs: f64, timeout_count: f64, warn_at: f64) -> Self {
        let timeout_ms = interval_secs * 1000.0 * timeout_count;
        let timeout_warning_ms = timeout_ms * warn_at;
        let check_interval_ms = (timeout_ms - timeout_warning_ms) / 3.0;
        Self { timeout_ms, timeout_warning_ms, check_interval_ms }
    }

    /// Like [`from_interval`](Self::from_interval), but `None` when the
    /// interval is not a positive number or the derived timeout does not fit
    /// in a [`Duration`].
    #[must_use]
    pub fn try_from_interval(interval_secs: f64, timeout_count: f64, warn_at: f64) -> Option<Self> {
        if !interval_secs.is_finite() || interval_secs <= 0.0 {
            return None;
        }
        let settings = Self::from_interval(interval_secs, timeout_count, warn_at);
        if !settings.timeout_ms.is_finite() || settings.timeout_ms <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(settings.timeout_ms / 1000.0).ok()?;
        Some(settings)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        millis(self.timeout_ms)
    }

    #[must_use]
    pub fn timeout_warning(&self) -> Duration {
        millis(self.timeout_warning_ms)
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        millis(self.check_interval_ms)
    }
}

fn millis(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).unwrap_or(Duration::MAX)
}

// =============================================================================
// DATA
// =============================================================================

/// Outcome of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    NotMonitoring,
    /// Monitoring, but the connection is not `Connected`.
    Skipped,
    Healthy,
    /// Warning threshold crossed for the first time this episode.
    Slow,
    AlreadyWarned,
    /// Timeout crossed for the first time this episode.
    Lost,
    AlreadyLost,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeepAliveData {
    pub settings: Option<KeepAliveSettings>,
    pub last_keep_alive: Option<Instant>,
    pub monitoring: bool,
    pub user_notified: bool,
    /// The lost-connection hook already ran this episode.
    pub lost_reported: bool,
}

impl KeepAliveData {
    /// Evaluate liveness at `now`, updating the per-episode warning flag.
    pub fn evaluate(&mut self, now: Instant, connected: bool) -> Verdict {
        if !self.monitoring {
            return Verdict::NotMonitoring;
        }
        if !connected {
            return Verdict::Skipped;
        }
        let (Some(settings), Some(last)) = (self.settings, self.last_keep_alive) else {
            return Verdict::Skipped;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed >= settings.timeout() {
            if self.lost_reported {
                Verdict::AlreadyLost
            } else {
                self.lost_reported = true;
                Verdict::Lost
            }
        } else if elapsed >= settings.timeout_warning() {
            if self.user_notified {
                Verdict::AlreadyWarned
            } else {
                self.user_notified = true;
                Verdict::Slow
            }
        } else {
            self.user_notified = false;
            self.lost_reported = false;
            Verdict::Healthy
        }
    }
}

// =============================================================================
// MONITOR
// =============================================================================

#[derive(Default)]
pub struct KeepAliveMonitor {
    data: Mutex<KeepAliveData>,
    task: Mutex<Option<CancellationToken>>,
}

impl KeepAliveMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install thresholds from negotiation. `None` disables monitoring.
    pub fn configure(&self, settings: Option<KeepAliveSettings>) {
        self.lock_data().settings = settings;
    }

    pub fn settings(&self) -> Option<KeepAliveSettings> {
        self.lock_data().settings
    }

    pub fn is_monitoring(&self) -> bool {
        self.lock_data().monitoring
    }

    pub fn snapshot(&self) -> KeepAliveData {
        self.lock_data().clone()
    }

    /// Refresh the keep-alive timestamp and end any lost episode.
    pub fn touch(&self) {
        let mut data = self.lock_data();
        data.last_keep_alive = Some(Instant::now());
        data.lost_reported = false;
    }

    /// Start monitoring. No-op (returns `false`) if already monitoring or if
    /// the server advertised no keep-alive.
    pub fn arm(&self, connection: &Connection) -> bool {
        let interval = {
            let mut data = self.lock_data();
            if data.monitoring {
                connection.log("tried to monitor keep alive but it is already being monitored");
                return false;
            }
            let Some(settings) = data.settings else {
                return false;
            };
            data.monitoring = true;
            data.user_notified = false;
            data.lost_reported = false;
            data.last_keep_alive = Some(Instant::now());
            connection.log(&format!(
                "now monitoring keep alive with a warning timeout of {}ms and a connection lost timeout of {}ms",
                settings.timeout_warning_ms, settings.timeout_ms
            ));
            settings.check_interval()
        };

        let token = CancellationToken::new();
        if let Some(previous) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let weak = connection.downgrade();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = check_loop(weak, interval) => {}
            }
        });
        true
    }

    /// Stop monitoring and clear per-episode state. Idempotent.
    pub fn disarm(&self) -> bool {
        if let Some(token) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
        let mut data = self.lock_data();
        let was_monitoring = data.monitoring;
        data.monitoring = false;
        data.user_notified = false;
        data.lost_reported = false;
        data.last_keep_alive = None;
        was_monitoring
    }

    /// Run one check against `connection`. Returns `false` once monitoring
    /// has stopped.
    pub(crate) fn check(&self, connection: &Connection) -> bool {
        let connected = connection.state() == ConnectionState::Connected;
        let verdict = self.lock_data().evaluate(Instant::now(), connected);
        match verdict {
            Verdict::NotMonitoring => return false,
            Verdict::Lost => {
                connection.log("keep alive timed out, notifying transport that the connection has been lost");
                connection.handle_lost_connection();
            }
            Verdict::Slow => {
                connection.log("keep alive has been missed, connection may be dead or slow");
                connection.publish(&ConnectionEvent::ConnectionSlow);
            }
            Verdict::Skipped | Verdict::Healthy | Verdict::AlreadyWarned | Verdict::AlreadyLost => {}
        }
        true
    }

    fn lock_data(&self) -> std::sync::MutexGuard<'_, KeepAliveData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for KeepAliveMonitor {
    fn drop(&mut self) {
        if let Some(token) = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
    }
}

async fn check_loop(weak: WeakConnection, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(connection) = weak.upgrade() else {
            return;
        };
        if !connection.keep_alive().check(&connection) {
            return;
        }
    }
}

#[cfg(test)]
#[path = "keepalive_test.rs"]
mod tests;
