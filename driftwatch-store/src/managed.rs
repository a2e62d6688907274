//! Store routed through the shared connection
//!
//! Every call resolves the live handle from the `SharedConnectionManager`
//! first, so consumers fail with `StoreError::NotConnected` until the
//! composition root has connected, and all of them use the same handle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftwatch_domain::{RunSession, Sample, SessionId, SessionTally, Subject, UnitLogRecord};

use crate::connection::{Connector, SharedConnectionManager};
use crate::error::StoreError;
use crate::repository::{SampleRepository, SessionRepository, Store};

/// Store backed by the handle of a shared connection.
pub struct ManagedStore<C>
where
    C: Connector,
    C::Handle: Store,
{
    manager: Arc<SharedConnectionManager<C>>,
}

impl<C> ManagedStore<C>
where
    C: Connector,
    C::Handle: Store,
{
    /// Route storage calls through `manager`
    pub fn new(manager: Arc<SharedConnectionManager<C>>) -> Self {
        Self { manager }
    }

    /// The shared connection this store uses
    pub fn manager(&self) -> &Arc<SharedConnectionManager<C>> {
        &self.manager
    }

    fn handle(&self) -> Result<C::Handle, StoreError> {
        Ok(self.manager.handle()?)
    }
}

impl<C> Clone for ManagedStore<C>
where
    C: Connector,
    C::Handle: Store,
{
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

#[async_trait]
impl<C> SampleRepository for ManagedStore<C>
where
    C: Connector,
    C::Handle: Store,
{
    async fn append(&self, sample: &Sample) -> Result<(), StoreError> {
        let handle = self.handle()?;
        handle.samples().append(sample).await
    }

    async fn find_recent(&self, subject: &Subject, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let handle = self.handle()?;
        handle.samples().find_recent(subject, limit).await
    }

    async fn count(&self, subject: &Subject) -> Result<u64, StoreError> {
        let handle = self.handle()?;
        handle.samples().count(subject).await
    }
}

#[async_trait]
impl<C> SessionRepository for ManagedStore<C>
where
    C: Connector,
    C::Handle: Store,
{
    async fn insert_session(&self, session: &RunSession) -> Result<(), StoreError> {
        let handle = self.handle()?;
        handle.sessions().insert_session(session).await
    }

    async fn finish_session(
        &self,
        id: &SessionId,
        tally: SessionTally,
        ended_at: DateTime<Utc>,
    ) -> Result<RunSession, StoreError> {
        let handle = self.handle()?;
        handle.sessions().finish_session(id, tally, ended_at).await
    }

    async fn find_session(&self, id: &SessionId) -> Result<Option<RunSession>, StoreError> {
        let handle = self.handle()?;
        handle.sessions().find_session(id).await
    }

    async fn append_unit(&self, record: &UnitLogRecord) -> Result<(), StoreError> {
        let handle = self.handle()?;
        handle.sessions().append_unit(record).await
    }

    async fn find_units(&self, id: &SessionId) -> Result<Vec<UnitLogRecord>, StoreError> {
        let handle = self.handle()?;
        handle.sessions().find_units(id).await
    }
}

impl<C> Store for ManagedStore<C>
where
    C: Connector,
    C::Handle: Store,
{
    fn samples(&self) -> &dyn SampleRepository {
        self
    }

    fn sessions(&self) -> &dyn SessionRepository {
        self
    }
}
