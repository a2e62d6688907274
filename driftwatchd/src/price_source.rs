//! Value sources driven by the daemon.
//!
//! A `ValueSource` is a `FetchOperation` that can also be probed once at
//! startup, before the poller takes over.

use async_trait::async_trait;
use tracing::debug;

use driftwatch_connectors::{BinanceRestClient, BinanceRestError};
use driftwatch_domain::{Observation, Subject};
use driftwatch_exec::{FetchError, FetchOperation, StubFetch};

/// Fetch operation with a startup reachability probe.
#[async_trait]
pub trait ValueSource: FetchOperation {
    /// Check that the source answers.
    async fn ping(&self) -> Result<(), FetchError>;
}

// =============================================================================
// Binance ticker
// =============================================================================

/// Latest Binance ticker price of one symbol.
#[derive(Debug, Clone)]
pub struct BinanceTickerSource {
    client: BinanceRestClient,
    subject: Subject,
}

impl BinanceTickerSource {
    /// Poll `subject` through `client`.
    pub fn new(client: BinanceRestClient, subject: Subject) -> Self {
        Self { client, subject }
    }

    /// Subject being polled.
    pub fn subject(&self) -> &Subject {
        &self.subject
    }
}

#[async_trait]
impl FetchOperation for BinanceTickerSource {
    async fn fetch(&self) -> Result<Observation, FetchError> {
        let observation = self.client.observe(&self.subject).await.map_err(to_fetch_error)?;
        debug!(subject = %self.subject, value = %observation.value, "Ticker fetched");
        Ok(observation)
    }
}

#[async_trait]
impl ValueSource for BinanceTickerSource {
    async fn ping(&self) -> Result<(), FetchError> {
        self.client.ping().await.map_err(to_fetch_error)
    }
}

fn to_fetch_error(error: BinanceRestError) -> FetchError {
    match error {
        BinanceRestError::Timeout => FetchError::Timeout(error.to_string()),
        BinanceRestError::ParseError(_) | BinanceRestError::InvalidParameter(_) => {
            FetchError::InvalidValue(error.to_string())
        },
        BinanceRestError::RequestFailed(_) | BinanceRestError::ApiError { .. } => {
            FetchError::Unavailable(error.to_string())
        },
    }
}

// =============================================================================
// Stub
// =============================================================================

#[async_trait]
impl ValueSource for StubFetch {
    async fn ping(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert!(matches!(to_fetch_error(BinanceRestError::Timeout), FetchError::Timeout(_)));
        assert!(matches!(
            to_fetch_error(BinanceRestError::ParseError("bad".into())),
            FetchError::InvalidValue(_)
        ));
        assert!(matches!(
            to_fetch_error(BinanceRestError::InvalidParameter("symbol".into())),
            FetchError::InvalidValue(_)
        ));
        assert!(matches!(
            to_fetch_error(BinanceRestError::ApiError { code: -1121, msg: "Invalid symbol.".into() }),
            FetchError::Unavailable(_)
        ));
        assert!(matches!(
            to_fetch_error(BinanceRestError::RequestFailed("refused".into())),
            FetchError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let client = BinanceRestClient::with_base_url("http://127.0.0.1:9")
            .with_timeout(std::time::Duration::from_millis(500));
        let source = BinanceTickerSource::new(client, Subject::new("BTCUSDT").unwrap());

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Unavailable(_) | FetchError::Timeout(_)), "{:?}", err);
    }
}
