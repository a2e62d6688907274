//! PostgreSQL backing store.
//!
//! - `PgConnector` opens the pool for the `SharedConnectionManager`
//! - `PgStore` implements the repositories over that pool
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftwatch_domain::{
    RunSession, Sample, SessionId, SessionStatus, SessionTally, Subject, UnitLogRecord, UnitStatus,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::connection::{ConnectionError, Connector};
use crate::error::StoreError;
use crate::repository::{SampleRepository, SessionRepository, Store};

/// Minimum idle connections kept by the pool
const MIN_CONNECTIONS: u32 = 2;

// =============================================================================
// Connector
// =============================================================================

/// Opens a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgConnector {
    url: String,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgConnector {
    /// Connector for `url` with a pool of at most `max_connections`.
    pub fn new(url: impl Into<String>, max_connections: u32) -> Self {
        Self {
            url: url.into(),
            max_connections: max_connections.max(1),
            acquire_timeout: Duration::from_secs(5),
        }
    }

    /// Override how long a query waits for a pooled connection.
    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Handle = PgStore;

    async fn connect(&self) -> Result<PgStore, ConnectionError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(MIN_CONNECTIONS.min(self.max_connections))
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.url)
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        Ok(PgStore::new(pool))
    }

    async fn ping(&self, handle: &PgStore) -> Result<(), ConnectionError> {
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(handle.pool())
            .await
            .map_err(|e| ConnectionError::Ping(e.to_string()))?;

        if one != 1 {
            return Err(ConnectionError::Ping(format!("Unexpected ping result: {}", one)));
        }
        Ok(())
    }

    async fn close(&self, handle: PgStore) {
        handle.pool().close().await;
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}

// =============================================================================
// Store
// =============================================================================

/// Repositories over a PostgreSQL pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an open pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u32(column: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| {
        StoreError::Deserialization(format!("Column {} out of range: {}", column, value))
    })
}

fn parse_sample(row: &PgRow) -> Result<Sample, StoreError> {
    let subject: String = row.try_get("subject")?;
    let value: Decimal = row.try_get("value")?;
    let observed_at: DateTime<Utc> = row.try_get("observed_at")?;
    let captured_at: DateTime<Utc> = row.try_get("captured_at")?;

    Ok(Sample::new(Subject::new(subject)?, value, observed_at, captured_at))
}

fn parse_session(row: &PgRow) -> Result<RunSession, StoreError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;

    Ok(RunSession {
        id: SessionId::new(id)?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        total_units: to_u32("total_units", row.try_get("total_units")?)?,
        succeeded: to_u32("succeeded", row.try_get("succeeded")?)?,
        failed: to_u32("failed", row.try_get("failed")?)?,
        skipped: to_u32("skipped", row.try_get("skipped")?)?,
        status: status.parse::<SessionStatus>()?,
    })
}

fn parse_unit(row: &PgRow) -> Result<UnitLogRecord, StoreError> {
    let session_id: String = row.try_get("session_id")?;
    let status: String = row.try_get("status")?;
    let duration_ms: i64 = row.try_get("duration_ms")?;

    Ok(UnitLogRecord {
        session_id: SessionId::new(session_id)?,
        unit_name: row.try_get("unit_name")?,
        status: status.parse::<UnitStatus>()?,
        started_at: row.try_get("started_at")?,
        duration_ms: u64::try_from(duration_ms).unwrap_or(0),
        error_message: row.try_get("error_message")?,
        details: row.try_get("details")?,
    })
}

const SESSION_COLUMNS: &str =
    "id, started_at, ended_at, total_units, succeeded, failed, skipped, status";

#[async_trait]
impl SampleRepository for PgStore {
    async fn append(&self, sample: &Sample) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO samples (subject, value, observed_at, captured_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(sample.subject().as_str())
        .bind(sample.value())
        .bind(sample.observed_at())
        .bind(sample.captured_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_recent(&self, subject: &Subject, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT subject, value, observed_at, captured_at
            FROM samples
            WHERE subject = $1
            ORDER BY captured_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(subject.as_str())
        .bind(to_i64(limit as u64))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_sample).collect()
    }

    async fn count(&self, subject: &Subject) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM samples WHERE subject = $1")
            .bind(subject.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl SessionRepository for PgStore {
    async fn insert_session(&self, session: &RunSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO run_sessions
                (id, started_at, ended_at, total_units, succeeded, failed, skipped, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id.as_str())
        .bind(session.started_at)
        .bind(session.ended_at)
        .bind(i64::from(session.total_units))
        .bind(i64::from(session.succeeded))
        .bind(i64::from(session.failed))
        .bind(i64::from(session.skipped))
        .bind(session.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::Duplicate { .. } => StoreError::duplicate("session", session.id.as_str()),
            other => other,
        })?;

        Ok(())
    }

    async fn finish_session(
        &self,
        id: &SessionId,
        tally: SessionTally,
        ended_at: DateTime<Utc>,
    ) -> Result<RunSession, StoreError> {
        let query = format!(
            r#"
            UPDATE run_sessions
            SET ended_at = $2, succeeded = $3, failed = $4, skipped = $5, status = $6
            WHERE id = $1 AND ended_at IS NULL
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(id.as_str())
            .bind(ended_at)
            .bind(i64::from(tally.succeeded))
            .bind(i64::from(tally.failed))
            .bind(i64::from(tally.skipped))
            .bind(tally.final_status().as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => parse_session(&row),
            None => match self.find_session(id).await? {
                Some(_) => Err(StoreError::InvalidState {
                    message: format!("Session {} already ended", id),
                }),
                None => Err(StoreError::not_found("session", id.as_str())),
            },
        }
    }

    async fn find_session(&self, id: &SessionId) -> Result<Option<RunSession>, StoreError> {
        let query = format!("SELECT {} FROM run_sessions WHERE id = $1", SESSION_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(parse_session).transpose()
    }

    async fn append_unit(&self, record: &UnitLogRecord) -> Result<(), StoreError> {
        // Only open sessions accept units; FOR SHARE blocks a concurrent finish
        let result = sqlx::query(
            r#"
            INSERT INTO unit_logs
                (session_id, unit_name, status, started_at, duration_ms, error_message, details)
            SELECT $1, $2, $3, $4::timestamptz, $5::bigint, $6, $7
            WHERE EXISTS (
                SELECT 1 FROM run_sessions
                WHERE id = $1 AND ended_at IS NULL
                FOR SHARE
            )
            "#,
        )
        .bind(record.session_id.as_str())
        .bind(&record.unit_name)
        .bind(record.status.as_str())
        .bind(record.started_at)
        .bind(to_i64(record.duration_ms))
        .bind(record.error_message.as_deref())
        .bind(record.details.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.find_session(&record.session_id).await? {
            Some(_) => Err(StoreError::InvalidState {
                message: format!("Session {} already ended", record.session_id),
            }),
            None => Err(StoreError::not_found("session", record.session_id.as_str())),
        }
    }

    async fn find_units(&self, id: &SessionId) -> Result<Vec<UnitLogRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, unit_name, status, started_at, duration_ms, error_message, details
            FROM unit_logs
            WHERE session_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_unit).collect()
    }
}

impl Store for PgStore {
    fn samples(&self) -> &dyn SampleRepository {
        self
    }

    fn sessions(&self) -> &dyn SessionRepository {
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use driftwatch_domain::UnitOutcome;
    use rust_decimal_macros::dec;

    #[sqlx::test(migrations = "../migrations")]
    async fn test_sample_roundtrip(pool: PgPool) -> anyhow::Result<()> {
        let store = PgStore::new(pool);
        let subject = Subject::new("BTCUSDT")?;

        for value in [dec!(100), dec!(100.05), dec!(100.2)] {
            let now = Utc::now();
            store.append(&Sample::new(subject.clone(), value, now, now)).await?;
        }

        assert_eq!(store.count(&subject).await?, 3);

        let recent = store.find_recent(&subject, 2).await?;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].value(), dec!(100.2));
        Ok(())
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_session_lifecycle(pool: PgPool) -> anyhow::Result<()> {
        let store = PgStore::new(pool);
        let id = SessionId::generate(Some("test"));

        store.insert_session(&RunSession::start(id.clone(), 2, Utc::now())).await?;
        store
            .append_unit(&UnitLogRecord::from_outcome(
                id.clone(),
                "store.connect",
                UnitOutcome::success(Utc::now(), 4),
            ))
            .await?;
        store
            .append_unit(&UnitLogRecord::from_outcome(
                id.clone(),
                "source.ping",
                UnitOutcome::failed(Utc::now(), 10, "timeout"),
            ))
            .await?;

        let units = store.find_units(&id).await?;
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].error_message.as_deref(), Some("timeout"));

        let ended = store.finish_session(&id, SessionTally::new(1, 1, 0), Utc::now()).await?;
        assert_eq!(ended.status, SessionStatus::Failed);

        let again = store.finish_session(&id, SessionTally::new(1, 1, 0), Utc::now()).await;
        assert!(matches!(again, Err(StoreError::InvalidState { .. })));
        Ok(())
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_unit_for_ended_session(pool: PgPool) -> anyhow::Result<()> {
        let store = PgStore::new(pool);
        let id = SessionId::generate(Some("test"));

        store.insert_session(&RunSession::start(id.clone(), 1, Utc::now())).await?;
        store.finish_session(&id, SessionTally::default(), Utc::now()).await?;

        let late = UnitLogRecord::from_outcome(id.clone(), "late", UnitOutcome::success(Utc::now(), 1));
        let result = store.append_unit(&late).await;

        assert!(matches!(result, Err(StoreError::InvalidState { .. })));
        assert!(store.find_units(&id).await?.is_empty());
        Ok(())
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_unit_for_unknown_session(pool: PgPool) -> anyhow::Result<()> {
        let store = PgStore::new(pool);
        let record = UnitLogRecord::from_outcome(
            SessionId::generate(None),
            "orphan",
            UnitOutcome::skipped("no session"),
        );

        let result = store.append_unit(&record).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        Ok(())
    }
}
