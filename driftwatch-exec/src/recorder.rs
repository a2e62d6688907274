//! Session recorder.
//!
//! Records the lifecycle of a run (a batch of independent named units) and
//! the outcome of each unit. Recording is best-effort: storage failures are
//! logged and swallowed so they never abort the run being observed.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use futures_util::FutureExt;
use tracing::{debug, info, warn};

use driftwatch_domain::{RunSession, SessionId, SessionTally, UnitLogRecord, UnitOutcome};
use driftwatch_store::SessionRepository;

/// Report of one executed unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport<T> {
    /// Whether the unit succeeded
    pub succeeded: bool,
    /// Wall-clock duration of the unit
    pub duration_ms: u64,
    /// Error message when the unit failed or panicked
    pub error: Option<String>,
    /// Value produced by a successful unit
    pub value: Option<T>,
}

/// Best-effort message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Records run sessions and their units.
pub struct SessionRecorder {
    sessions: Arc<dyn SessionRepository>,
    prefix: Option<String>,
    /// Units recorded per open session (only those actually persisted)
    tallies: Mutex<HashMap<SessionId, SessionTally>>,
}

impl SessionRecorder {
    /// Recorder writing to `sessions`.
    pub fn new(sessions: Arc<dyn SessionRepository>) -> Self {
        Self {
            sessions,
            prefix: None,
            tallies: Mutex::new(HashMap::new()),
        }
    }

    /// Prefix generated session ids with `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.trim().is_empty()).then_some(prefix);
        self
    }

    fn tallies(&self) -> MutexGuard<'_, HashMap<SessionId, SessionTally>> {
        self.tallies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new session in `Running` state.
    ///
    /// Always returns an id; if the session cannot be stored the failure is
    /// logged and later calls for it are best-effort as usual.
    pub async fn start_session(&self, total_units: u32) -> SessionId {
        let id = SessionId::generate(self.prefix.as_deref());
        let session = RunSession::start(id.clone(), total_units, Utc::now());

        self.tallies().insert(id.clone(), SessionTally::default());

        match self.sessions.insert_session(&session).await {
            Ok(()) => info!(session_id = %id, total_units, "Session started"),
            Err(e) => warn!(session_id = %id, error = %e, "Failed to record session start"),
        }
        id
    }

    /// Append a unit record to a session.
    pub async fn record_unit(&self, id: &SessionId, unit_name: &str, outcome: UnitOutcome) {
        let record = UnitLogRecord::from_outcome(id.clone(), unit_name, outcome);

        match self.sessions.append_unit(&record).await {
            Ok(()) => {
                if let Some(tally) = self.tallies().get_mut(id) {
                    tally.record(record.status);
                }
                debug!(
                    session_id = %id,
                    unit = unit_name,
                    status = %record.status,
                    duration_ms = record.duration_ms,
                    "Unit recorded"
                );
            },
            Err(e) => {
                warn!(session_id = %id, unit = unit_name, error = %e, "Failed to record unit");
            },
        }
    }

    /// Record a unit that was not executed.
    pub async fn skip_unit(&self, id: &SessionId, unit_name: &str, reason: impl Into<String>) {
        self.record_unit(id, unit_name, UnitOutcome::skipped(reason)).await;
    }

    /// End a session with explicit counts.
    ///
    /// Status is `Failed` if `failed > 0`, `Completed` otherwise.
    pub async fn end_session(&self, id: &SessionId, succeeded: u32, failed: u32, skipped: u32) {
        self.tallies().remove(id);
        self.close(id, SessionTally::new(succeeded, failed, skipped)).await;
    }

    /// End a session with the counts of the units recorded through this recorder.
    pub async fn finish_session(&self, id: &SessionId) -> SessionTally {
        let tally = self.tallies().remove(id).unwrap_or_default();
        self.close(id, tally).await;
        tally
    }

    async fn close(&self, id: &SessionId, tally: SessionTally) {
        match self.sessions.finish_session(id, tally, Utc::now()).await {
            Ok(session) => info!(
                session_id = %id,
                status = %session.status,
                succeeded = tally.succeeded,
                failed = tally.failed,
                skipped = tally.skipped,
                "Session ended"
            ),
            Err(e) => warn!(session_id = %id, error = %e, "Failed to record session end"),
        }
    }

    /// Counts recorded so far for an open session.
    pub fn tally(&self, id: &SessionId) -> Option<SessionTally> {
        self.tallies().get(id).copied()
    }

    /// Run `op` as a unit of session `id`, time it and record the outcome.
    ///
    /// Errors and panics are captured in the report, never propagated.
    pub async fn execute_and_record<T, E, F, Fut>(
        &self,
        id: &SessionId,
        unit_name: &str,
        op: F,
    ) -> UnitReport<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let started_at = Utc::now();
        let started = Instant::now();

        let result = AssertUnwindSafe(async move { op().await }).catch_unwind().await;
        let duration_ms = elapsed_ms(started);

        let (report, outcome) = match result {
            Ok(Ok(value)) => (
                UnitReport {
                    succeeded: true,
                    duration_ms,
                    error: None,
                    value: Some(value),
                },
                UnitOutcome::success(started_at, duration_ms),
            ),
            Ok(Err(e)) => {
                let message = e.to_string();
                (
                    UnitReport {
                        succeeded: false,
                        duration_ms,
                        error: Some(message.clone()),
                        value: None,
                    },
                    UnitOutcome::failed(started_at, duration_ms, message),
                )
            },
            Err(payload) => {
                let message = format!("panicked: {}", panic_message(payload.as_ref()));
                (
                    UnitReport {
                        succeeded: false,
                        duration_ms,
                        error: Some(message.clone()),
                        value: None,
                    },
                    UnitOutcome::failed(started_at, duration_ms, message),
                )
            },
        };

        if let Some(error) = &report.error {
            warn!(session_id = %id, unit = unit_name, duration_ms, %error, "Unit failed");
        } else {
            info!(session_id = %id, unit = unit_name, duration_ms, "Unit succeeded");
        }

        self.record_unit(id, unit_name, outcome).await;
        report
    }

    /// Like `execute_and_record`, but hands the unit's error back to the caller
    /// and resumes a panic after recording it.
    pub async fn try_execute_and_record<T, E, F, Fut>(
        &self,
        id: &SessionId,
        unit_name: &str,
        op: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let started_at = Utc::now();
        let started = Instant::now();

        let result = AssertUnwindSafe(async move { op().await }).catch_unwind().await;
        let duration_ms = elapsed_ms(started);

        match result {
            Ok(Ok(value)) => {
                self.record_unit(id, unit_name, UnitOutcome::success(started_at, duration_ms))
                    .await;
                Ok(value)
            },
            Ok(Err(e)) => {
                self.record_unit(
                    id,
                    unit_name,
                    UnitOutcome::failed(started_at, duration_ms, e.to_string()),
                )
                .await;
                Err(e)
            },
            Err(payload) => {
                let message = format!("panicked: {}", panic_message(payload.as_ref()));
                self.record_unit(id, unit_name, UnitOutcome::failed(started_at, duration_ms, message))
                    .await;
                std::panic::resume_unwind(payload)
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
