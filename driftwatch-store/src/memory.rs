//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftwatch_domain::{RunSession, Sample, SessionId, SessionTally, Subject, UnitLogRecord};

use crate::connection::{ConnectionError, Connector};
use crate::error::StoreError;
use crate::repository::{SampleRepository, SessionRepository, Store};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Memory Store
// =============================================================================

struct MemoryInner {
    samples: RwLock<Vec<Sample>>,
    sessions: RwLock<HashMap<SessionId, RunSession>>,
    units: RwLock<Vec<UnitLogRecord>>,
    available: AtomicBool,
}

/// In-memory store. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                samples: RwLock::new(Vec::new()),
                sessions: RwLock::new(HashMap::new()),
                units: RwLock::new(Vec::new()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate the backing store going away (or coming back).
    ///
    /// While unavailable every repository call fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Whether repository calls currently succeed
    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Get the number of samples across all subjects
    pub fn sample_count(&self) -> usize {
        read(&self.inner.samples).len()
    }

    /// Get the number of sessions
    pub fn session_count(&self) -> usize {
        read(&self.inner.sessions).len()
    }

    /// Get the number of unit records
    pub fn unit_count(&self) -> usize {
        read(&self.inner.units).len()
    }

    /// Whether both values share the same underlying data
    pub fn same_as(&self, other: &MemoryStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        write(&self.inner.samples).clear();
        write(&self.inner.sessions).clear();
        write(&self.inner.units).clear();
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleRepository for MemoryStore {
    async fn append(&self, sample: &Sample) -> Result<(), StoreError> {
        self.check_available()?;
        write(&self.inner.samples).push(sample.clone());
        Ok(())
    }

    async fn find_recent(&self, subject: &Subject, limit: usize) -> Result<Vec<Sample>, StoreError> {
        self.check_available()?;
        let samples = read(&self.inner.samples);
        Ok(samples
            .iter()
            .rev()
            .filter(|s| s.subject() == subject)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, subject: &Subject) -> Result<u64, StoreError> {
        self.check_available()?;
        let samples = read(&self.inner.samples);
        Ok(samples.iter().filter(|s| s.subject() == subject).count() as u64)
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert_session(&self, session: &RunSession) -> Result<(), StoreError> {
        self.check_available()?;
        let mut sessions = write(&self.inner.sessions);
        if sessions.contains_key(&session.id) {
            return Err(StoreError::duplicate("session", session.id.as_str()));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn finish_session(
        &self,
        id: &SessionId,
        tally: SessionTally,
        ended_at: DateTime<Utc>,
    ) -> Result<RunSession, StoreError> {
        self.check_available()?;
        let mut sessions = write(&self.inner.sessions);
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("session", id.as_str()))?;
        session.finish(tally, ended_at)?;
        Ok(session.clone())
    }

    async fn find_session(&self, id: &SessionId) -> Result<Option<RunSession>, StoreError> {
        self.check_available()?;
        Ok(read(&self.inner.sessions).get(id).cloned())
    }

    async fn append_unit(&self, record: &UnitLogRecord) -> Result<(), StoreError> {
        self.check_available()?;
        // Held across the push so a concurrent finish cannot slip in between
        let sessions = read(&self.inner.sessions);
        match sessions.get(&record.session_id) {
            None => return Err(StoreError::not_found("session", record.session_id.as_str())),
            Some(session) if session.is_ended() => {
                return Err(StoreError::InvalidState {
                    message: format!("Session {} already ended", record.session_id),
                });
            },
            Some(_) => {},
        }
        write(&self.inner.units).push(record.clone());
        Ok(())
    }

    async fn find_units(&self, id: &SessionId) -> Result<Vec<UnitLogRecord>, StoreError> {
        self.check_available()?;
        Ok(read(&self.inner.units)
            .iter()
            .filter(|u| &u.session_id == id)
            .cloned()
            .collect())
    }
}

impl Store for MemoryStore {
    fn samples(&self) -> &dyn SampleRepository {
        self
    }

    fn sessions(&self) -> &dyn SessionRepository {
        self
    }
}

// =============================================================================
// Memory Connector
// =============================================================================

/// Connector handing out a shared `MemoryStore`.
///
/// Counts attempts and closes, and can be told to be slow or to fail.
pub struct MemoryConnector {
    store: MemoryStore,
    target: String,
    latency_ms: AtomicU64,
    ping_latency_ms: AtomicU64,
    fail_connect: AtomicBool,
    fail_ping: AtomicBool,
    attempts: AtomicUsize,
    closes: AtomicUsize,
}

impl MemoryConnector {
    /// Connector over a fresh empty store
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Connector over an existing store
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            target: "memory://driftwatch".to_string(),
            latency_ms: AtomicU64::new(0),
            ping_latency_ms: AtomicU64::new(0),
            fail_connect: AtomicBool::new(false),
            fail_ping: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Connector reporting a custom target address
    pub fn with_target(target: impl Into<String>) -> Self {
        let mut connector = Self::new();
        connector.target = target.into();
        connector
    }

    /// Delay every connect by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Change the connect delay
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay every ping by `latency`
    pub fn set_ping_latency(&self, latency: Duration) {
        self.ping_latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make connect attempts fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make pings fail
    pub fn set_fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    /// Number of underlying connect attempts
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of handles closed
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// The store handed out on connect
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Handle = MemoryStore;

    async fn connect(&self) -> Result<MemoryStore, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Connect("memory connector set to fail".to_string()));
        }
        Ok(self.store.clone())
    }

    async fn ping(&self, handle: &MemoryStore) -> Result<(), ConnectionError> {
        let latency = self.ping_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_ping.load(Ordering::SeqCst) || !handle.is_available() {
            return Err(ConnectionError::Ping("memory store unavailable".to_string()));
        }
        Ok(())
    }

    async fn close(&self, _handle: MemoryStore) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use driftwatch_domain::{UnitOutcome, UnitStatus};
    use rust_decimal_macros::dec;

    fn subject(s: &str) -> Subject {
        Subject::new(s).unwrap()
    }

    fn sample(s: &str, value: rust_decimal::Decimal) -> Sample {
        let now = Utc::now();
        Sample::new(subject(s), value, now, now)
    }

    #[tokio::test]
    async fn test_append_and_count_samples() {
        let store = MemoryStore::new();

        store.append(&sample("BTCUSDT", dec!(100))).await.unwrap();
        store.append(&sample("BTCUSDT", dec!(101))).await.unwrap();
        store.append(&sample("ETHUSDT", dec!(3000))).await.unwrap();

        assert_eq!(store.count(&subject("BTCUSDT")).await.unwrap(), 2);
        assert_eq!(store.count(&subject("ETHUSDT")).await.unwrap(), 1);
        assert_eq!(store.sample_count(), 3);
    }

    #[tokio::test]
    async fn test_find_recent_is_newest_first() {
        let store = MemoryStore::new();
        for v in [dec!(1), dec!(2), dec!(3)] {
            store.append(&sample("BTCUSDT", v)).await.unwrap();
        }

        let recent = store.find_recent(&subject("BTCUSDT"), 2).await.unwrap();
        let values: Vec<_> = recent.iter().map(|s| s.value()).collect();
        assert_eq!(values, vec![dec!(3), dec!(2)]);
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_everything() {
        let store = MemoryStore::new();
        store.set_available(false);

        let result = store.append(&sample("BTCUSDT", dec!(1))).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.sample_count(), 0);

        store.set_available(true);
        store.append(&sample("BTCUSDT", dec!(1))).await.unwrap();
        assert_eq!(store.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = MemoryStore::new();
        let id = SessionId::generate(None);
        store.insert_session(&RunSession::start(id.clone(), 2, Utc::now())).await.unwrap();

        let ok = UnitLogRecord::from_outcome(id.clone(), "a", UnitOutcome::success(Utc::now(), 3));
        let bad = UnitLogRecord::from_outcome(id.clone(), "b", UnitOutcome::failed(Utc::now(), 1, "boom"));
        store.append_unit(&ok).await.unwrap();
        store.append_unit(&bad).await.unwrap();

        let units = store.find_units(&id).await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].status, UnitStatus::Failed);

        let ended = store
            .finish_session(&id, SessionTally::new(1, 1, 0), Utc::now())
            .await
            .unwrap();
        assert!(ended.is_ended());
        assert_eq!(ended.status, driftwatch_domain::SessionStatus::Failed);

        // Ending twice is rejected
        let again = store.finish_session(&id, SessionTally::default(), Utc::now()).await;
        assert!(matches!(again, Err(StoreError::Domain(_))));
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected() {
        let store = MemoryStore::new();
        let session = RunSession::start(SessionId::generate(None), 1, Utc::now());

        store.insert_session(&session).await.unwrap();
        let result = store.insert_session(&session).await;
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[tokio::test]
    async fn test_unit_for_unknown_session_rejected() {
        let store = MemoryStore::new();
        let record = UnitLogRecord::from_outcome(
            SessionId::generate(None),
            "orphan",
            UnitOutcome::skipped("no session"),
        );

        let result = store.append_unit(&record).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_unit_for_ended_session_rejected() {
        let store = MemoryStore::new();
        let id = SessionId::generate(None);
        store.insert_session(&RunSession::start(id.clone(), 1, Utc::now())).await.unwrap();
        store
            .append_unit(&UnitLogRecord::from_outcome(id.clone(), "a", UnitOutcome::success(Utc::now(), 1)))
            .await
            .unwrap();
        store.finish_session(&id, SessionTally::new(1, 0, 0), Utc::now()).await.unwrap();

        let late = UnitLogRecord::from_outcome(id.clone(), "late", UnitOutcome::success(Utc::now(), 1));
        let result = store.append_unit(&late).await;

        assert!(matches!(result, Err(StoreError::InvalidState { .. })));
        assert_eq!(store.find_units(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_connector_shares_store() {
        let connector = MemoryConnector::new();
        let handle = connector.connect().await.unwrap();

        handle.append(&sample("BTCUSDT", dec!(1))).await.unwrap();
        assert_eq!(connector.store().sample_count(), 1);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_connector_ping_follows_availability() {
        let connector = MemoryConnector::new();
        let handle = connector.connect().await.unwrap();
        assert!(connector.ping(&handle).await.is_ok());

        handle.set_available(false);
        assert!(connector.ping(&handle).await.is_err());
    }
}
