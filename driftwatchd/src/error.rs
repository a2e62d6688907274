//! Daemon error types.

use driftwatch_engine::PolicyError;
use driftwatch_exec::ExecError;
use driftwatch_store::ConnectionError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Stop policy error
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Shared connection could not be established
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
