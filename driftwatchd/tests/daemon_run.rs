//! End-to-end runs of the daemon against the in-memory store.

use std::time::Duration;

use driftwatch_domain::{SessionStatus, Subject, UnitStatus};
use driftwatch_exec::{PollOutcome, StubFetch};
use driftwatch_store::{MemoryConnector, Store};
use driftwatchd::{Config, Daemon};
use rust_decimal_macros::dec;

fn btc() -> Subject {
    Subject::new("BTCUSDT").unwrap()
}

#[tokio::test]
async fn threshold_run_persists_every_sample_through_one_connection() {
    let connector = MemoryConnector::new();
    let store = connector.store().clone();
    let source = StubFetch::sequence(btc(), [dec!(100), dec!(100.05), dec!(100.08), dec!(100.2)]);
    let daemon = Daemon::new(Config::test(), connector, source);

    let report = daemon.run_until(std::future::pending()).await.unwrap();

    match &report.outcome {
        PollOutcome::ThresholdReached { baseline, sample, drift } => {
            assert_eq!(baseline.value(), dec!(100));
            assert_eq!(sample.value(), dec!(100.2));
            assert_eq!(*drift, dec!(0.002));
        },
        other => panic!("expected threshold, got {:?}", other),
    }

    // Poller and recorder shared a single connect
    assert_eq!(daemon.connection().connector().attempts(), 1);
    assert_eq!(daemon.connection().connector().closes(), 1);

    assert_eq!(store.samples().count(&btc()).await.unwrap(), 4);
    let recent = store.samples().find_recent(&btc(), 2).await.unwrap();
    assert_eq!(recent[0].value(), dec!(100.2));
    assert_eq!(recent[1].value(), dec!(100.08));

    let session = store.sessions().find_session(&report.session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.total_units, 4);
    assert_eq!(session.succeeded, 4);
}

#[tokio::test]
async fn transient_failures_do_not_end_the_run() {
    let connector = MemoryConnector::new();
    let store = connector.store().clone();
    let source = StubFetch::new(btc())
        .then_value(dec!(100))
        .then_fail("exchange hiccup")
        .then_value(dec!(100.01))
        .then_value(dec!(99));
    let daemon = Daemon::new(Config::test(), connector, source);

    let report = daemon.run_until(std::future::pending()).await.unwrap();

    assert!(report.outcome.is_threshold_reached());
    assert_eq!(report.status.fetch_failures, 1);
    assert_eq!(report.status.samples_persisted, 3);
    assert_eq!(store.sample_count(), 3);
    assert_eq!(report.tally.final_status(), SessionStatus::Completed);
}

#[tokio::test]
async fn shutdown_records_a_stopped_run() {
    let connector = MemoryConnector::new();
    let store = connector.store().clone();
    let daemon = Daemon::new(Config::test(), connector, StubFetch::constant(btc(), dec!(100)));

    let report = daemon
        .run_until(tokio::time::sleep(Duration::from_millis(60)))
        .await
        .unwrap();

    assert_eq!(report.outcome, PollOutcome::Stopped);

    // No cycles run once the daemon has returned
    let persisted = store.sample_count();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(store.sample_count(), persisted);

    let units = store.sessions().find_units(&report.session_id).await.unwrap();
    let run = units.iter().find(|u| u.unit_name == "poller.run").unwrap();
    assert_eq!(run.status, UnitStatus::Success);
    assert!(run.details.as_deref().unwrap().starts_with("stopped before threshold"));
    assert!(!daemon.connection().is_connected());
}

#[tokio::test]
async fn store_outage_is_tolerated_while_polling() {
    let connector = MemoryConnector::new();
    let store = connector.store().clone();
    let source = StubFetch::sequence(btc(), [dec!(100), dec!(100.01), dec!(100.02)])
        .then_value(dec!(101))
        .with_latency(Duration::from_millis(5));
    let daemon = Daemon::new(Config::test(), connector, source);

    let outage = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(12)).await;
            store.set_available(false);
            tokio::time::sleep(Duration::from_millis(20)).await;
            store.set_available(true);
        })
    };

    let report = daemon.run_until(std::future::pending()).await.unwrap();
    outage.await.unwrap();

    assert!(report.outcome.is_threshold_reached());
    assert_eq!(
        report.status.samples_persisted + report.status.storage_failures,
        report.status.cycles - report.status.fetch_failures
    );
}
