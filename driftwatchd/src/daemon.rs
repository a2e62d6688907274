//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Shared connection manager (one backing-store connection per process)
//! - Value source (Binance ticker or stub)
//! - Polling fetcher with the threshold stop policy
//! - Session recorder (startup steps and the polling run as units)
//!
//! # Lifecycle
//!
//! 1. Connect the shared store connection (fatal on failure)
//! 2. Open a session and record `store.connect`
//! 3. Probe the source (`source.ping`) and start the poller (`poller.start`)
//! 4. Wait for the threshold or a shutdown signal
//! 5. Stop and join the poller, record `poller.run`, finish the session
//! 6. Release the shared connection

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use driftwatch_connectors::BinanceRestClient;
use driftwatch_domain::{SessionId, SessionTally, UnitOutcome};
use driftwatch_engine::ThresholdStopPolicy;
use driftwatch_exec::{FetchOperation, PollOutcome, PollerStatus, PollingFetcher, SessionRecorder, StubFetch};
use driftwatch_store::{
    Connector, ManagedStore, MemoryConnector, SampleRepository, SessionRepository,
    SharedConnectionManager, Store,
};

use crate::config::Config;
use crate::error::DaemonResult;
use crate::price_source::{BinanceTickerSource, ValueSource};

/// Units recorded for every run.
const UNIT_STORE_CONNECT: &str = "store.connect";
const UNIT_SOURCE_PING: &str = "source.ping";
const UNIT_POLLER_START: &str = "poller.start";
const UNIT_POLLER_RUN: &str = "poller.run";
const TOTAL_UNITS: u32 = 4;

// =============================================================================
// Report
// =============================================================================

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Session the run was recorded under
    pub session_id: SessionId,
    /// How polling ended
    pub outcome: PollOutcome,
    /// Poller counters at the end of the run
    pub status: PollerStatus,
    /// Unit counts the session was closed with
    pub tally: SessionTally,
}

// =============================================================================
// Daemon
// =============================================================================

/// The main driftwatch daemon.
pub struct Daemon<C: Connector, S: ValueSource + 'static>
where
    C::Handle: Store,
{
    /// Configuration
    config: Config,
    /// Shared backing-store connection
    connection: Arc<SharedConnectionManager<C>>,
    /// Repositories routed through the shared connection
    store: Arc<ManagedStore<C>>,
    /// Value source
    source: Arc<S>,
}

impl Daemon<MemoryConnector, StubFetch> {
    /// Create a new daemon with stub components (for testing/development).
    ///
    /// The stub source answers a constant value, so the run only ends on a
    /// shutdown signal.
    pub fn new_stub(config: Config) -> Self {
        let source = StubFetch::constant(config.poller.subject.clone(), Decimal::ONE_HUNDRED);
        Self::new(config, MemoryConnector::new(), source)
    }
}

impl<C: Connector> Daemon<C, BinanceTickerSource>
where
    C::Handle: Store,
{
    /// Create a daemon polling the Binance ticker configured in `config`.
    pub fn with_binance(config: Config, connector: C) -> Self {
        let client = BinanceRestClient::with_base_url(config.source.base_url.clone());
        let source = BinanceTickerSource::new(client, config.poller.subject.clone());
        Self::new(config, connector, source)
    }
}

impl<C: Connector, S: ValueSource + 'static> Daemon<C, S>
where
    C::Handle: Store,
{
    /// Create a new daemon with provided components.
    pub fn new(config: Config, connector: C, source: S) -> Self {
        let connection = Arc::new(SharedConnectionManager::new(
            connector,
            config.store.connect_timeout,
        ));
        let store = Arc::new(ManagedStore::new(Arc::clone(&connection)));

        Self {
            config,
            connection,
            store,
            source: Arc::new(source),
        }
    }

    /// Shared connection manager.
    pub fn connection(&self) -> &Arc<SharedConnectionManager<C>> {
        &self.connection
    }

    /// Value source.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Run until the threshold is reached or Ctrl-C is received.
    pub async fn run(&self) -> DaemonResult<RunReport> {
        self.run_until(ctrl_c()).await
    }

    /// Run until the threshold is reached or `shutdown` resolves.
    ///
    /// # Errors
    /// - `DaemonError::Connection` if the shared connection cannot be established
    /// - `DaemonError::Policy` if the configured threshold is invalid
    /// - `DaemonError::Exec` if the poller refuses to start
    pub async fn run_until<F>(&self, shutdown: F) -> DaemonResult<RunReport>
    where
        F: Future<Output = ()>,
    {
        info!(
            subject = %self.config.poller.subject,
            poll_interval_ms = self.config.poller.poll_interval.as_millis() as u64,
            threshold = %self.config.poller.threshold,
            store = %self.connection.target(),
            "Starting daemon"
        );

        let policy = ThresholdStopPolicy::new(self.config.poller.threshold)?;

        let connect_started_at = Utc::now();
        let connect_started = Instant::now();
        if let Err(e) = self.connection.connect().await {
            error!(error = %e, store = %self.connection.target(), "Failed to connect to backing store");
            self.connection.disconnect().await;
            return Err(e.into());
        }
        let connect_ms = connect_started.elapsed().as_millis() as u64;

        let result = self
            .run_connected(policy, UnitOutcome::success(connect_started_at, connect_ms), shutdown)
            .await;

        self.connection.disconnect().await;
        info!("Daemon stopped");

        result
    }

    async fn run_connected<F>(
        &self,
        policy: ThresholdStopPolicy,
        connect_outcome: UnitOutcome,
        shutdown: F,
    ) -> DaemonResult<RunReport>
    where
        F: Future<Output = ()>,
    {
        let sessions: Arc<dyn SessionRepository> = self.store.clone();
        let mut recorder = SessionRecorder::new(sessions);
        if let Some(prefix) = &self.config.session_prefix {
            recorder = recorder.with_prefix(prefix.clone());
        }

        let session_id = recorder.start_session(TOTAL_UNITS).await;
        recorder.record_unit(&session_id, UNIT_STORE_CONNECT, connect_outcome).await;

        let ping = recorder
            .execute_and_record(&session_id, UNIT_SOURCE_PING, || self.source.ping())
            .await;
        if let Some(e) = &ping.error {
            warn!(error = %e, "Source probe failed, polling anyway");
        }

        let fetch: Arc<dyn FetchOperation> = self.source.clone();
        let samples: Arc<dyn SampleRepository> = self.store.clone();
        let poller = PollingFetcher::new(
            self.config.poller.poll_interval,
            fetch,
            samples,
            Arc::new(policy),
        );

        if let Err(e) = recorder
            .try_execute_and_record(&session_id, UNIT_POLLER_START, || poller.start())
            .await
        {
            recorder.skip_unit(&session_id, UNIT_POLLER_RUN, "poller did not start").await;
            recorder.finish_session(&session_id).await;
            return Err(e.into());
        }

        let run_started_at = Utc::now();
        let run_started = Instant::now();

        let outcome = tokio::select! {
            biased;

            outcome = poller.wait() => outcome,
            _ = shutdown => {
                info!("Received shutdown signal");
                poller.stop();
                PollOutcome::Stopped
            }
        };

        poller.stop();
        poller.join().await;

        let status = poller.status();
        let details = match &outcome {
            PollOutcome::ThresholdReached { baseline, sample, drift } => {
                info!(
                    baseline = %baseline.value(),
                    value = %sample.value(),
                    %drift,
                    "Threshold reached"
                );
                format!(
                    "threshold reached: baseline {} value {} drift {}",
                    baseline.value(),
                    sample.value(),
                    drift
                )
            },
            PollOutcome::Stopped => "stopped before threshold".to_string(),
        };
        let details = format!(
            "{}; cycles {} persisted {} fetch failures {} storage failures {}",
            details,
            status.cycles,
            status.samples_persisted,
            status.fetch_failures,
            status.storage_failures
        );

        let run_ms = run_started.elapsed().as_millis() as u64;
        recorder
            .record_unit(
                &session_id,
                UNIT_POLLER_RUN,
                UnitOutcome::success(run_started_at, run_ms).with_details(details),
            )
            .await;

        let tally = recorder.finish_session(&session_id).await;
        info!(
            session_id = %session_id,
            status = %tally.final_status(),
            succeeded = tally.succeeded,
            failed = tally.failed,
            skipped = tally.skipped,
            "Session finished"
        );

        Ok(RunReport {
            session_id,
            outcome,
            status,
            tally,
        })
    }
}

/// Resolves on Ctrl-C. Never resolves if the signal handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use driftwatch_domain::{SessionStatus, Subject, UnitStatus};
    use driftwatch_exec::FetchError;
    use driftwatch_store::ConnectionState;
    use rust_decimal_macros::dec;

    fn subject() -> Subject {
        Subject::new("BTCUSDT").unwrap()
    }

    #[tokio::test]
    async fn test_threshold_run_records_all_units() {
        let connector = MemoryConnector::new();
        let store = connector.store().clone();
        let source = StubFetch::sequence(subject(), [dec!(100), dec!(100.05), dec!(100.2)]);
        let daemon = Daemon::new(Config::test(), connector, source);

        let report = daemon.run_until(std::future::pending()).await.unwrap();

        assert!(report.outcome.is_threshold_reached());
        assert_eq!(report.status.samples_persisted, 3);
        assert_eq!(report.tally.succeeded, 4);
        assert_eq!(report.tally.final_status(), SessionStatus::Completed);
        assert!(report.session_id.as_str().starts_with("test-session-"));

        let session = store.sessions().find_session(&report.session_id).await.unwrap().unwrap();
        assert!(session.is_ended());
        assert_eq!(session.status, SessionStatus::Completed);

        let units = store.sessions().find_units(&report.session_id).await.unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.unit_name.as_str()).collect();
        assert_eq!(names, [UNIT_STORE_CONNECT, UNIT_SOURCE_PING, UNIT_POLLER_START, UNIT_POLLER_RUN]);
        assert!(units[3].details.as_deref().unwrap().contains("threshold reached"));

        assert_eq!(daemon.connection().state(), ConnectionState::Disconnected);
        assert_eq!(daemon.connection().connector().closes(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_run() {
        let daemon = Daemon::new_stub(Config::test());

        let report = daemon
            .run_until(tokio::time::sleep(std::time::Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(report.outcome, PollOutcome::Stopped);
        assert!(report.status.samples_persisted >= 1);
        assert_eq!(report.tally.final_status(), SessionStatus::Completed);
        assert!(!daemon.connection().is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let connector = MemoryConnector::new();
        connector.set_fail_connect(true);
        let store = connector.store().clone();
        let daemon = Daemon::new(Config::test(), connector, StubFetch::constant(subject(), dec!(1)));

        let err = daemon.run_until(std::future::pending()).await.unwrap_err();

        assert!(matches!(err, crate::DaemonError::Connection(_)));
        assert_eq!(store.session_count(), 0);
        assert_eq!(daemon.source().call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_threshold_fails_before_connecting() {
        let mut config = Config::test();
        config.poller.threshold = dec!(-0.5);
        let daemon = Daemon::new(config, MemoryConnector::new(), StubFetch::constant(subject(), dec!(1)));

        let err = daemon.run_until(std::future::pending()).await.unwrap_err();

        assert!(matches!(err, crate::DaemonError::Policy(_)));
        assert_eq!(daemon.connection().connector().attempts(), 0);
    }

    struct UnreachableSource(StubFetch);

    #[async_trait::async_trait]
    impl FetchOperation for UnreachableSource {
        async fn fetch(&self) -> Result<driftwatch_domain::Observation, FetchError> {
            self.0.fetch().await
        }
    }

    #[async_trait::async_trait]
    impl ValueSource for UnreachableSource {
        async fn ping(&self) -> Result<(), FetchError> {
            Err(FetchError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_probe_is_recorded_and_run_continues() {
        let connector = MemoryConnector::new();
        let store = connector.store().clone();
        let source = UnreachableSource(StubFetch::sequence(subject(), [dec!(100), dec!(102)]));
        let daemon = Daemon::new(Config::test(), connector, source);

        let report = daemon.run_until(std::future::pending()).await.unwrap();

        assert!(report.outcome.is_threshold_reached());
        assert_eq!(report.tally.failed, 1);
        assert_eq!(report.tally.final_status(), SessionStatus::Failed);

        let units = store.sessions().find_units(&report.session_id).await.unwrap();
        let ping = units.iter().find(|u| u.unit_name == UNIT_SOURCE_PING).unwrap();
        assert_eq!(ping.status, UnitStatus::Failed);
        assert!(ping.error_message.as_deref().unwrap().contains("connection refused"));
    }
}
