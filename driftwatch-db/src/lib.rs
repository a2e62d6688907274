//! Database lifecycle management for Driftwatch.
//!
//! Provides migration running and status checking for the PostgreSQL
//! backing store.

use std::collections::HashSet;

use sqlx::migrate::Migrator;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Embedded migrations from the workspace `migrations` directory.
pub static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

/// One applied migration as recorded by sqlx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Migration version (timestamp prefix of the file name)
    pub version: i64,
    /// Description derived from the file name
    pub description: String,
    /// Whether the migration completed
    pub success: bool,
}

/// Snapshot of the schema state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStatus {
    /// Migrations recorded in `_sqlx_migrations`, newest first
    pub applied: Vec<AppliedMigration>,
    /// Versions embedded in this binary that are not applied yet
    pub pending: Vec<i64>,
}

impl DbStatus {
    /// Whether every embedded migration has been applied successfully
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && self.applied.iter().all(|m| m.success)
    }
}

/// Run all pending migrations.
///
/// Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    MIGRATOR.run(pool).await?;

    info!("Migrations completed successfully");
    Ok(())
}

/// Check database connectivity and migration status.
///
/// Logs the applied migrations and any pending ones.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let result: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;
    if result != 1 {
        return Err(anyhow::anyhow!("Database connectivity check failed"));
    }

    info!("Database connectivity: OK");

    // Runtime query: sqlx::query! would require a database at compile time
    let rows = sqlx::query(
        r#"
        SELECT version, description, success
        FROM _sqlx_migrations
        ORDER BY version DESC
        "#,
    )
    .fetch_all(pool)
    .await;

    let applied = match rows {
        Ok(rows) => rows
            .iter()
            .map(|row| {
                Ok(AppliedMigration {
                    version: row.try_get("version")?,
                    description: row.try_get("description")?,
                    success: row.try_get("success")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?,
        Err(e) => {
            // Table does not exist before the first migration
            if e.to_string().contains("_sqlx_migrations") {
                warn!("Migration table not found (run `driftwatchd db migrate` first)");
                Vec::new()
            } else {
                return Err(e.into());
            }
        },
    };

    let status = DbStatus {
        pending: pending_versions(&applied),
        applied,
    };

    for mig in &status.applied {
        let mark = if mig.success { "✓" } else { "✗" };
        info!("  {} v{}: {}", mark, mig.version, mig.description);
    }
    if status.pending.is_empty() {
        info!("Schema is up to date");
    } else {
        warn!(pending = ?status.pending, "Pending migrations");
    }

    Ok(status)
}

fn pending_versions(applied: &[AppliedMigration]) -> Vec<i64> {
    let done: HashSet<i64> = applied.iter().filter(|m| m.success).map(|m| m.version).collect();
    MIGRATOR
        .iter()
        .map(|m| m.version)
        .filter(|v| !done.contains(v))
        .collect()
}
