//! Driftwatch Daemon Library
//!
//! Composition root for the drift watcher: polls a value source on a fixed
//! period, persists every sample through one shared backing-store
//! connection and stops once the value drifts past a threshold from the
//! run's first sample. Startup steps and the polling run are recorded as
//! units of a session.
//!
//! # Architecture
//!
//! ```text
//! Value Source → Polling Fetcher → Sample Repository ┐
//!                      ↓                             ├→ Shared Connection
//!               Threshold Policy   Session Recorder ─┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use driftwatchd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod price_source;

#[cfg(feature = "postgres")]
pub mod db;

// Re-exports for convenience
pub use config::{Config, Environment, LogFormat, PollerConfig, SourceConfig, StoreConfig};
pub use daemon::{Daemon, RunReport};
pub use error::{DaemonError, DaemonResult};
pub use price_source::{BinanceTickerSource, ValueSource};
