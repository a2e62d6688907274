//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for the domain.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftwatch_domain::{RunSession, Sample, SessionId, SessionTally, Subject, UnitLogRecord};

/// Repository for Sample entities (append-only)
#[async_trait]
pub trait SampleRepository: Send + Sync {
    /// Append a sample
    async fn append(&self, sample: &Sample) -> Result<(), StoreError>;

    /// Most recent samples for a subject, newest first
    async fn find_recent(&self, subject: &Subject, limit: usize) -> Result<Vec<Sample>, StoreError>;

    /// Number of samples stored for a subject
    async fn count(&self, subject: &Subject) -> Result<u64, StoreError>;
}

/// Repository for run sessions and their unit records
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session (fails on duplicate id)
    async fn insert_session(&self, session: &RunSession) -> Result<(), StoreError>;

    /// End a running session with final counts, returning the ended session
    async fn finish_session(
        &self,
        id: &SessionId,
        tally: SessionTally,
        ended_at: DateTime<Utc>,
    ) -> Result<RunSession, StoreError>;

    /// Find a session by ID
    async fn find_session(&self, id: &SessionId) -> Result<Option<RunSession>, StoreError>;

    /// Append a unit record to an existing session
    async fn append_unit(&self, record: &UnitLogRecord) -> Result<(), StoreError>;

    /// Unit records of a session, in append order
    async fn find_units(&self, id: &SessionId) -> Result<Vec<UnitLogRecord>, StoreError>;
}

/// Combined store interface
pub trait Store: Send + Sync {
    /// Get sample repository
    fn samples(&self) -> &dyn SampleRepository;

    /// Get session repository
    fn sessions(&self) -> &dyn SessionRepository;
}
