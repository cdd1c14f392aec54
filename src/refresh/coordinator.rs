use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use super::invoker::Invoker;
use super::RefreshOutcome;
use crate::error::CollectorError;

/// Extra time granted to an invoker past its own deadline before the
/// coordinator gives up on it and releases the gate.
const INVOKER_GRACE: Duration = Duration::from_secs(5);

// ─── Public types ────────────────────────────────────────────────

/// Gates collector runs: at most one in flight, and none within
/// `debounce` of the last successful run.
pub struct RefreshCoordinator {
    invoker: Arc<dyn Invoker>,
    debounce: Duration,
    timeout: Duration,

    /// The exclusion gate. Held for the whole decide-and-invoke sequence.
    gate: tokio::sync::Mutex<RefreshState>,

    stats: Mutex<RefreshStats>,
}

/// Read-only view served by `/api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshStatus {
    pub attempts: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub debounced: u64,
    pub in_flight: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_failure: Option<&'static str>,
    pub last_duration_ms: Option<u64>,
    pub debounce_secs: u64,
    pub timeout_secs: u64,
}

// ─── Internal state ──────────────────────────────────────────────

struct RefreshState {
    /// `None` until the first success; never persisted.
    last_success: Option<Instant>,
}

#[derive(Default)]
struct RefreshStats {
    attempts: u64,
    succeeded: u64,
    failed: u64,
    debounced: u64,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_failure: Option<&'static str>,
    last_duration: Option<Duration>,
}

// ─── RefreshCoordinator impl ─────────────────────────────────────

impl RefreshCoordinator {
    pub fn new(invoker: Arc<dyn Invoker>, debounce: Duration, timeout: Duration) -> Self {
        Self {
            invoker,
            debounce,
            timeout,
            gate: tokio::sync::Mutex::new(RefreshState { last_success: None }),
            stats: Mutex::new(RefreshStats::default()),
        }
    }

    /// Run the collector unless a successful run happened within the
    /// debounce window. Callers arriving while a run is in flight wait for
    /// it, then re-check the window.
    pub async fn request_refresh(&self) -> RefreshOutcome {
        let mut state = self.gate.lock().await;

        if let Some(last) = state.last_success {
            if last.elapsed() < self.debounce {
                self.stats.lock().debounced += 1;
                return RefreshOutcome::Debounced;
            }
        }

        self.stats.lock().attempts += 1;
        let started = Instant::now();

        let result = match tokio::time::timeout(
            self.timeout.saturating_add(INVOKER_GRACE),
            self.invoker.run(self.timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Invoker overran its deadline; abandoning run"
                );
                Err(CollectorError::TimedOut(self.timeout))
            }
        };
        let elapsed = started.elapsed();

        let mut stats = self.stats.lock();
        stats.last_duration = Some(elapsed);

        match result {
            Ok(run) => {
                state.last_success = Some(Instant::now());
                stats.succeeded += 1;
                stats.last_success_at = Some(Utc::now());
                tracing::info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    exit_code = ?run.exit_code,
                    "Snapshot refreshed"
                );
                RefreshOutcome::Succeeded
            }
            Err(e) => {
                stats.failed += 1;
                stats.last_failure_at = Some(Utc::now());
                stats.last_failure = Some(e.kind());
                tracing::warn!(
                    error = %e,
                    kind = e.kind(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Snapshot refresh failed; serving cached snapshot"
                );
                RefreshOutcome::Failed(e)
            }
        }
    }

    /// Like [`request_refresh`](Self::request_refresh), but the run lives on
    /// its own task so a dropped caller (disconnected HTTP client) cannot
    /// cancel a collector mid-flight.
    pub async fn request_refresh_detached(self: &Arc<Self>) -> RefreshOutcome {
        let this = Arc::clone(self);
        match tokio::spawn(async move { this.request_refresh().await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Refresh task aborted");
                RefreshOutcome::Failed(CollectorError::Wait(std::io::Error::other(e.to_string())))
            }
        }
    }

    pub fn status(&self) -> RefreshStatus {
        let in_flight = self.gate.try_lock().is_err();
        let stats = self.stats.lock();
        RefreshStatus {
            attempts: stats.attempts,
            succeeded: stats.succeeded,
            failed: stats.failed,
            debounced: stats.debounced,
            in_flight,
            last_success_at: stats.last_success_at,
            last_failure_at: stats.last_failure_at,
            last_failure: stats.last_failure,
            last_duration_ms: stats.last_duration.map(|d| d.as_millis() as u64),
            debounce_secs: self.debounce.as_secs(),
            timeout_secs: self.timeout.as_secs(),
        }
    }
}
