//! Polling fetcher.
//!
//! Runs a fetch → persist → evaluate cycle at a fixed period until the stop
//! policy fires or the owner calls `stop()`.
//!
//! # State machine
//!
//! ```text
//! Idle ──start()──► Running ──(threshold | stop())──► Stopped
//! ```
//!
//! `Stopped` is terminal. Cycles never overlap: the loop awaits each cycle
//! before waiting for the next tick, and ticks missed while a cycle overran
//! the period are skipped.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use driftwatch_domain::Sample;
use driftwatch_engine::{StopDecision, StopPolicy};
use driftwatch_store::SampleRepository;

use crate::error::{ExecError, ExecResult};
use crate::ports::{FetchError, FetchOperation};
use crate::recorder::panic_message;

// =============================================================================
// State & Outcome
// =============================================================================

/// Lifecycle state of a `PollingFetcher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    /// Constructed, not started
    Idle,
    /// Cycles are being scheduled
    Running,
    /// Terminal
    Stopped,
}

/// How a polling run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The stop policy fired on `sample`
    ThresholdReached {
        /// First successful sample of the run
        baseline: Sample,
        /// Sample that crossed the threshold
        sample: Sample,
        /// Drift of `sample` from `baseline`
        drift: Decimal,
    },
    /// `stop()` was called before the policy fired
    Stopped,
}

impl PollOutcome {
    /// Whether the run ended because the threshold was reached
    pub fn is_threshold_reached(&self) -> bool {
        matches!(self, PollOutcome::ThresholdReached { .. })
    }
}

/// Snapshot of a poller's progress.
#[derive(Debug, Clone, Serialize)]
pub struct PollerStatus {
    /// Lifecycle state
    pub state: PollerState,
    /// Period between cycles in milliseconds
    pub period_ms: u64,
    /// Baseline of the run, once established
    pub baseline: Option<Sample>,
    /// Cycles started
    pub cycles: u64,
    /// Samples persisted successfully
    pub samples_persisted: u64,
    /// Cycles whose fetch failed
    pub fetch_failures: u64,
    /// Samples that could not be persisted
    pub storage_failures: u64,
    /// Evaluations the policy could not decide (e.g., zero baseline)
    pub policy_failures: u64,
}

#[derive(Default)]
struct Stats {
    cycles: AtomicU64,
    samples_persisted: AtomicU64,
    fetch_failures: AtomicU64,
    storage_failures: AtomicU64,
    policy_failures: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Shared loop state
// =============================================================================

struct Shared {
    period: Duration,
    fetch: Arc<dyn FetchOperation>,
    samples: Arc<dyn SampleRepository>,
    policy: Arc<dyn StopPolicy>,
    state: Mutex<PollerState>,
    baseline: OnceLock<Sample>,
    cancel: CancellationToken,
    outcome: watch::Sender<Option<PollOutcome>>,
    stats: Stats,
}

impl Shared {
    /// One fetch → persist → evaluate cycle.
    ///
    /// Returns the outcome when the stop policy fires.
    async fn run_cycle(&self) -> Option<PollOutcome> {
        let cycle = self.stats.cycles.fetch_add(1, Ordering::SeqCst) + 1;

        let fetched = AssertUnwindSafe(self.fetch.fetch())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(FetchError::Panicked(panic_message(payload.as_ref()))));

        let observation = match fetched {
            Ok(observation) => observation,
            Err(e) => {
                self.stats.fetch_failures.fetch_add(1, Ordering::SeqCst);
                warn!(cycle, error = %e, "Fetch failed, skipping cycle");
                return None;
            },
        };

        let sample = Sample::capture(observation);

        match self.samples.append(&sample).await {
            Ok(()) => {
                self.stats.samples_persisted.fetch_add(1, Ordering::SeqCst);
            },
            Err(e) => {
                self.stats.storage_failures.fetch_add(1, Ordering::SeqCst);
                warn!(cycle, subject = %sample.subject(), error = %e, "Failed to persist sample");
            },
        }

        let baseline = self.baseline.get_or_init(|| {
            info!(subject = %sample.subject(), value = %sample.value(), "Baseline established");
            sample.clone()
        });

        match self.policy.evaluate(baseline, &sample) {
            Ok(StopDecision::Continue { drift }) => {
                debug!(
                    cycle,
                    subject = %sample.subject(),
                    value = %sample.value(),
                    %drift,
                    "Sample within threshold"
                );
                None
            },
            Ok(StopDecision::Stop { drift }) => {
                info!(
                    cycle,
                    subject = %sample.subject(),
                    baseline = %baseline.value(),
                    value = %sample.value(),
                    %drift,
                    "Threshold reached"
                );
                Some(PollOutcome::ThresholdReached {
                    baseline: baseline.clone(),
                    sample,
                    drift,
                })
            },
            Err(e) => {
                self.stats.policy_failures.fetch_add(1, Ordering::SeqCst);
                warn!(cycle, error = %e, "Stop policy could not evaluate sample");
                None
            },
        }
    }

    /// Enter the terminal state, publishing `outcome` unless one is already set.
    fn finish(&self, outcome: PollOutcome) {
        // State first: a woken `wait()` must observe `Stopped`.
        *lock(&self.state) = PollerState::Stopped;
        self.cancel.cancel();
        self.outcome.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(outcome);
                true
            } else {
                false
            }
        });
    }
}

// =============================================================================
// Polling Fetcher
// =============================================================================

/// Fetches, persists and evaluates samples at a fixed period.
pub struct PollingFetcher {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingFetcher {
    /// Create an idle poller.
    pub fn new(
        period: Duration,
        fetch: Arc<dyn FetchOperation>,
        samples: Arc<dyn SampleRepository>,
        policy: Arc<dyn StopPolicy>,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                period,
                fetch,
                samples,
                policy,
                state: Mutex::new(PollerState::Idle),
                baseline: OnceLock::new(),
                cancel: CancellationToken::new(),
                outcome,
                stats: Stats::default(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Run the first cycle, then schedule one cycle every period.
    ///
    /// # Errors
    /// - `ExecError::AlreadyRunning` if already running
    /// - `ExecError::Stopped` if the poller already reached its terminal state
    pub async fn start(&self) -> ExecResult<()> {
        if self.shared.period.is_zero() {
            return Err(ExecError::InvalidState("Poll period must be > 0".to_string()));
        }

        {
            let mut state = lock(&self.shared.state);
            match *state {
                PollerState::Running => return Err(ExecError::AlreadyRunning),
                PollerState::Stopped => return Err(ExecError::Stopped),
                PollerState::Idle => *state = PollerState::Running,
            }
        }

        info!(period_ms = self.shared.period.as_millis() as u64, "Poller starting");

        if let Some(outcome) = self.shared.run_cycle().await {
            self.shared.finish(outcome);
            return Ok(());
        }

        if self.shared.cancel.is_cancelled() {
            debug!("Poller stopped during its first cycle");
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + shared.period, shared.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => {
                        debug!("Poller loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                if let Some(outcome) = shared.run_cycle().await {
                    shared.finish(outcome);
                    break;
                }
            }
        });

        *lock(&self.task) = Some(handle);
        Ok(())
    }

    /// Cancel future cycles and enter `Stopped`.
    ///
    /// Idempotent. A cycle already in flight runs to completion. The shared
    /// connection is left open.
    pub fn stop(&self) {
        let was = {
            let state = lock(&self.shared.state);
            *state
        };
        self.shared.finish(PollOutcome::Stopped);

        if was != PollerState::Stopped {
            info!("Poller stopped");
        }
    }

    /// Wait for the loop task to exit.
    pub async fn join(&self) {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Poller task ended abnormally");
            }
        }
    }

    /// Wait until the run ends and return how it ended.
    ///
    /// Never resolves for a poller that is neither started nor stopped.
    pub async fn wait(&self) -> PollOutcome {
        let mut rx = self.shared.outcome.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(PollOutcome::Stopped)
    }

    /// Outcome of the run, if it has ended.
    pub fn outcome(&self) -> Option<PollOutcome> {
        self.shared.outcome.borrow().clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PollerState {
        *lock(&self.shared.state)
    }

    /// Baseline of the run, once established.
    pub fn baseline(&self) -> Option<&Sample> {
        self.shared.baseline.get()
    }

    /// Snapshot of progress counters.
    pub fn status(&self) -> PollerStatus {
        let stats = &self.shared.stats;
        PollerStatus {
            state: self.state(),
            period_ms: self.shared.period.as_millis() as u64,
            baseline: self.shared.baseline.get().cloned(),
            cycles: stats.cycles.load(Ordering::SeqCst),
            samples_persisted: stats.samples_persisted.load(Ordering::SeqCst),
            fetch_failures: stats.fetch_failures.load(Ordering::SeqCst),
            storage_failures: stats.storage_failures.load(Ordering::SeqCst),
            policy_failures: stats.policy_failures.load(Ordering::SeqCst),
        }
    }
}

impl Drop for PollingFetcher {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================
