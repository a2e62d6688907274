//! Database CLI subcommands for driftwatchd.
//!
//! Provides `db migrate` and `db status` commands.

use anyhow::{anyhow, Result};
use std::env;
use tracing::{info, warn};

use driftwatch_db::{migrate, status};
use driftwatch_store::mask_uri;

/// Run database CLI subcommands.
///
/// Supported commands:
/// - `driftwatchd db migrate` - Run pending migrations
/// - `driftwatchd db status` - Check migration status
pub async fn run_db_command(args: Vec<String>) -> Result<()> {
    if args.len() < 3 {
        return Err(anyhow!("Usage: driftwatchd db <migrate|status>"));
    }

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow!("DATABASE_URL environment variable is required for db commands"))?;

    info!(database = %mask_uri(&database_url), "Connecting to database");
    let pool = sqlx::PgPool::connect(&database_url).await?;

    let result = match args[2].as_str() {
        "migrate" => migrate(&pool).await,
        "status" => status(&pool).await.map(|db_status| {
            if db_status.is_up_to_date() {
                info!(applied = db_status.applied.len(), "Schema is up to date");
            } else {
                warn!(pending = ?db_status.pending, "Schema has pending migrations");
            }
        }),
        other => Err(anyhow!("Unknown db command: {}. Use migrate or status", other)),
    };

    pool.close().await;
    result
}
