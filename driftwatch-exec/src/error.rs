//! Execution layer error types.

use thiserror::Error;

/// Errors that can occur while driving a poller.
#[derive(Debug, Error)]
pub enum ExecError {
    /// `start()` called on a poller that is already running
    #[error("Poller is already running")]
    AlreadyRunning,

    /// Poller reached its terminal state; build a new one to poll again
    #[error("Poller is stopped")]
    Stopped,

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
