//! Driftwatch Daemon
//!
//! Polls a price, persists every sample and stops once it drifts past the
//! configured threshold.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration (in-memory store, BTCUSDT)
//! cargo run -p driftwatchd
//!
//! # Start with custom environment
//! DRIFTWATCH_SUBJECT=ETHUSDT DRIFTWATCH_THRESHOLD=0.005 cargo run -p driftwatchd
//!
//! # Database commands (feature `postgres`)
//! DATABASE_URL=postgres://... cargo run -p driftwatchd --features postgres -- db migrate
//! ```
//!
//! # Environment Variables
//!
//! - `DRIFTWATCH_ENV`: Environment (test, development, production)
//! - `DRIFTWATCH_SUBJECT`: Price pair (default: BTCUSDT)
//! - `DRIFTWATCH_POLL_INTERVAL_MS`: Poll period (default: 10000)
//! - `DRIFTWATCH_THRESHOLD`: Drift fraction that stops the run (default: 0.001)
//! - `DATABASE_URL`: PostgreSQL URI (default: in-memory store)
//! - `DRIFTWATCH_DB_MAX_CONNECTIONS`: Pool size (default: 10)
//! - `DRIFTWATCH_CONNECT_TIMEOUT_MS`: Connect/ping bound (default: 5000)
//! - `DRIFTWATCH_SESSION_PREFIX`: Session id prefix (default: none)
//! - `DRIFTWATCH_SOURCE_URL`: Binance REST base URL (default: https://api.binance.com)
//! - `DRIFTWATCH_LOG_FORMAT`: pretty or json (default: pretty)

use driftwatch_store::{Connector, MemoryConnector, Store};
use driftwatchd::{Config, Daemon, Environment, LogFormat, ValueSource};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(config.log_format)?;

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("db") {
        return run_db(args).await;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        subject = %config.poller.subject,
        "Driftwatch Daemon"
    );

    if config.environment == Environment::Test {
        return run(Daemon::new_stub(config)).await;
    }

    #[cfg(feature = "postgres")]
    if let Some(url) = config.store.database_url.clone() {
        let connector = driftwatch_store::PgConnector::new(url, config.store.max_connections)
            .with_acquire_timeout(config.store.connect_timeout);
        return run(Daemon::with_binance(config, connector)).await;
    }

    #[cfg(not(feature = "postgres"))]
    if config.store.database_url.is_some() {
        tracing::warn!("DATABASE_URL is set but the postgres feature is disabled, using the in-memory store");
    }

    run(Daemon::with_binance(config, MemoryConnector::new())).await
}

async fn run<C, S>(daemon: Daemon<C, S>) -> anyhow::Result<()>
where
    C: Connector,
    C::Handle: Store,
    S: ValueSource + 'static,
{
    let report = daemon.run().await?;

    if report.outcome.is_threshold_reached() {
        info!(session_id = %report.session_id, "Threshold reached, exiting");
    } else {
        info!(session_id = %report.session_id, "Shutdown complete");
    }

    Ok(())
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("driftwatchd=info".parse()?)
        .add_directive("driftwatch_exec=info".parse()?)
        .add_directive("driftwatch_store=info".parse()?);

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }

    Ok(())
}

#[cfg(feature = "postgres")]
async fn run_db(args: Vec<String>) -> anyhow::Result<()> {
    driftwatchd::db::run_db_command(args).await
}

#[cfg(not(feature = "postgres"))]
async fn run_db(_args: Vec<String>) -> anyhow::Result<()> {
    anyhow::bail!("db commands require the `postgres` feature")
}
