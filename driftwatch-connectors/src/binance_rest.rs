//! Binance public REST client
//!
//! Only the unauthenticated market-data endpoints are used:
//! - `GET /api/v3/ticker/price` for the latest price of a symbol
//! - `GET /api/v3/ping` for connectivity checks
//!
//! Every request is bounded by a timeout so a stalled exchange cannot hold
//! a polling cycle open indefinitely.

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use driftwatch_domain::{Observation, Subject};

// =============================================================================
// Constants
// =============================================================================

/// Binance REST API base URL (Spot)
const BINANCE_API_URL: &str = "https://api.binance.com";

/// Default request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the Binance REST client.
#[derive(Debug, Clone, Error)]
pub enum BinanceRestError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// API returned error
    #[error("Binance API error: {code} - {msg}")]
    ApiError { code: i64, msg: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

// =============================================================================
// Binance REST Client
// =============================================================================

/// Binance REST API client for public market data.
#[derive(Debug, Clone)]
pub struct BinanceRestClient {
    /// HTTP client
    client: Client,
    /// Base URL (mainnet or a local mock)
    base_url: String,
    /// Per-request timeout
    request_timeout: Duration,
}

impl BinanceRestClient {
    /// Create a client against the Binance mainnet.
    pub fn new() -> Self {
        Self::with_base_url(BINANCE_API_URL)
    }

    /// Create a client against an arbitrary base URL (e.g., a local mock).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str, params: &[(&str, String)]) -> String {
        if params.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            let query = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            format!("{}{}?{}", self.base_url, endpoint, query)
        }
    }

    /// Send a GET request to a public endpoint.
    async fn get_public(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<String, BinanceRestError> {
        let url = self.url(endpoint, &params);
        debug!(%url, "GET");

        let response = timeout(self.request_timeout, self.client.get(&url).send())
            .await
            .map_err(|_| BinanceRestError::Timeout)?
            .map_err(|e| BinanceRestError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = timeout(self.request_timeout, response.text())
            .await
            .map_err(|_| BinanceRestError::Timeout)?
            .map_err(|e| BinanceRestError::ParseError(e.to_string()))?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<BinanceErrorResponse>(&body) {
                return Err(BinanceRestError::ApiError { code: err.code, msg: err.msg });
            }
            return Err(BinanceRestError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        Ok(body)
    }

    /// Get current price for a symbol.
    pub async fn get_price(&self, symbol: &str) -> Result<TickerPrice, BinanceRestError> {
        if symbol.is_empty() {
            return Err(BinanceRestError::InvalidParameter("symbol is empty".to_string()));
        }

        let body = self
            .get_public("/api/v3/ticker/price", vec![("symbol", symbol.to_string())])
            .await?;

        parse_ticker(&body)
    }

    /// Fetch the latest price of `subject` as an observation stamped now.
    pub async fn observe(&self, subject: &Subject) -> Result<Observation, BinanceRestError> {
        let ticker = self.get_price(subject.as_str()).await?;
        Ok(Observation::now(subject.clone(), ticker.price))
    }

    /// Ping Binance API to check connectivity.
    pub async fn ping(&self) -> Result<(), BinanceRestError> {
        let body = self.get_public("/api/v3/ping", vec![]).await?;

        // Ping returns empty JSON object {}
        if body.trim() == "{}" {
            Ok(())
        } else {
            Err(BinanceRestError::ParseError(format!("Unexpected ping response: {}", body)))
        }
    }
}

impl Default for BinanceRestClient {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Binance Types (from API responses)
// =============================================================================

/// Binance error response.
#[derive(Debug, Deserialize)]
struct BinanceErrorResponse {
    code: i64,
    msg: String,
}

/// Latest price ticker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickerPrice {
    /// Symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Last traded price
    pub price: Decimal,
}

fn parse_ticker(body: &str) -> Result<TickerPrice, BinanceRestError> {
    let ticker: TickerPrice =
        serde_json::from_str(body).map_err(|e| BinanceRestError::ParseError(e.to_string()))?;

    if ticker.price.is_sign_negative() {
        return Err(BinanceRestError::ParseError(format!(
            "Negative price in response: {}",
            ticker.price
        )));
    }

    Ok(ticker)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_ticker() {
        let ticker = parse_ticker(r#"{"symbol":"BTCUSDT","price":"64123.45000000"}"#).unwrap();
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.price, dec!(64123.45));
    }

    #[test]
    fn test_parse_ticker_rejects_garbage() {
        assert!(matches!(parse_ticker("<html>"), Err(BinanceRestError::ParseError(_))));
        assert!(matches!(
            parse_ticker(r#"{"symbol":"BTCUSDT","price":"-1"}"#),
            Err(BinanceRestError::ParseError(_))
        ));
    }

    #[test]
    fn test_url_building() {
        let client = BinanceRestClient::with_base_url("http://localhost:9000/");
        assert_eq!(client.base_url(), "http://localhost:9000");
        assert_eq!(client.url("/api/v3/ping", &[]), "http://localhost:9000/api/v3/ping");
        assert_eq!(
            client.url("/api/v3/ticker/price", &[("symbol", "BTCUSDT".to_string())]),
            "http://localhost:9000/api/v3/ticker/price?symbol=BTCUSDT"
        );
    }

    #[test]
    fn test_default_url() {
        assert_eq!(BinanceRestClient::default().base_url(), BINANCE_API_URL);
    }

    #[tokio::test]
    async fn test_get_price_rejects_empty_symbol() {
        let client = BinanceRestClient::new();
        let result = client.get_price("").await;
        assert!(matches!(result, Err(BinanceRestError::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_fails() {
        // Port 9 (discard) on localhost is closed on any sane test box
        let client = BinanceRestClient::with_base_url("http://127.0.0.1:9")
            .with_timeout(Duration::from_millis(500));
        assert!(client.ping().await.is_err());
    }
}
