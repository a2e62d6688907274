//! Execution layer port definitions.
//!
//! Ports define the interfaces for external value sources.
//! Adapters implement these ports for specific services (Binance, stub, etc.).

use async_trait::async_trait;
use thiserror::Error;

use driftwatch_domain::Observation;

/// Transient failure of a single fetch.
///
/// The poller logs it and moves on to the next cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Source could not be reached or answered with an error
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Source did not answer in time
    #[error("Fetch timed out: {0}")]
    Timeout(String),

    /// Source answered with something that is not a usable value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Fetch operation panicked
    #[error("Fetch panicked: {0}")]
    Panicked(String),
}

/// Produces one observation per call.
///
/// Implementations:
/// - `StubFetch` - Scripted values for tests
/// - `BinanceTickerSource` (driftwatchd) - Binance public ticker price
#[async_trait]
pub trait FetchOperation: Send + Sync {
    /// Fetch the current observation.
    async fn fetch(&self) -> Result<Observation, FetchError>;
}
