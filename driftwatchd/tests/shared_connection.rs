//! Many consumers sharing one backing-store connection.

use std::sync::Arc;
use std::time::Duration;

use driftwatch_domain::{Sample, Subject};
use driftwatch_store::{
    ConnectionError, ConnectionState, ManagedStore, MemoryConnector, SampleRepository,
    SharedConnectionManager, StoreError,
};
use rust_decimal_macros::dec;

fn manager(connector: MemoryConnector) -> Arc<SharedConnectionManager<MemoryConnector>> {
    Arc::new(SharedConnectionManager::new(connector, Duration::from_millis(500)))
}

#[tokio::test]
async fn concurrent_consumers_trigger_a_single_connect() {
    let manager = manager(MemoryConnector::new().with_latency(Duration::from_millis(30)));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect().await })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(manager.connector().attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Connected);

    let first = manager.handle().unwrap();
    let second = manager.handle().unwrap();
    assert!(first.same_as(&second));
}

#[tokio::test]
async fn concurrent_failure_reaches_every_waiter_and_next_connect_retries() {
    let connector = MemoryConnector::new().with_latency(Duration::from_millis(20));
    connector.set_fail_connect(true);
    let manager = manager(connector);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect().await })
        })
        .collect();

    for task in tasks {
        assert!(matches!(task.await.unwrap(), Err(ConnectionError::Connect(_))));
    }
    assert_eq!(manager.connector().attempts(), 1);
    assert!(manager.handle().is_err());

    manager.connector().set_fail_connect(false);
    manager.connect().await.unwrap();
    assert_eq!(manager.connector().attempts(), 2);
}

#[tokio::test]
async fn repositories_follow_the_connection_lifecycle() {
    let manager = manager(MemoryConnector::new());
    let store = ManagedStore::new(Arc::clone(&manager));
    let subject = Subject::new("ETHUSDT").unwrap();
    let sample = Sample::new(subject.clone(), dec!(3100.5), chrono::Utc::now(), chrono::Utc::now());

    assert!(matches!(store.append(&sample).await, Err(StoreError::NotConnected(_))));

    manager.connect().await.unwrap();
    store.append(&sample).await.unwrap();
    assert_eq!(store.count(&subject).await.unwrap(), 1);

    manager.disconnect().await;
    manager.disconnect().await;
    assert_eq!(manager.connector().closes(), 1);
    assert!(matches!(store.count(&subject).await, Err(StoreError::NotConnected(_))));
}
