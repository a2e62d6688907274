//! Session recording against the in-memory store.

use std::sync::Arc;

use driftwatch_domain::{SessionStatus, UnitStatus};
use driftwatch_exec::SessionRecorder;
use driftwatch_store::{MemoryStore, SessionRepository};

#[tokio::test]
async fn test_failing_unit_does_not_abort_the_batch() {
    let store = MemoryStore::new();
    let recorder = SessionRecorder::new(Arc::new(store.clone()));
    let id = recorder.start_session(3).await;

    let first = recorder
        .execute_and_record(&id, "first", || async { Ok::<_, String>(1) })
        .await;
    let second = recorder
        .execute_and_record(&id, "second", || async {
            Err::<i32, _>(anyhow::anyhow!("second unit failed"))
        })
        .await;
    let third = recorder
        .execute_and_record(&id, "third", || async { Ok::<_, String>(3) })
        .await;

    assert!(first.succeeded);
    assert!(!second.succeeded);
    assert_eq!(second.error.as_deref(), Some("second unit failed"));
    assert!(third.succeeded);

    let tally = recorder.finish_session(&id).await;
    assert_eq!(tally.total(), 3);

    let session = store.find_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!((session.succeeded, session.failed, session.skipped), (2, 1, 0));

    let units = store.find_units(&id).await.unwrap();
    let statuses: Vec<_> = units.iter().map(|u| u.status).collect();
    assert_eq!(statuses, vec![UnitStatus::Success, UnitStatus::Failed, UnitStatus::Success]);
}

#[tokio::test]
async fn test_all_units_succeeding_completes_the_session() {
    let store = MemoryStore::new();
    let recorder = SessionRecorder::new(Arc::new(store.clone()));
    let id = recorder.start_session(2).await;

    for name in ["a", "b"] {
        recorder
            .execute_and_record(&id, name, || async { Ok::<_, String>(()) })
            .await;
    }
    recorder.finish_session(&id).await;

    let session = store.find_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.succeeded, 2);
}
