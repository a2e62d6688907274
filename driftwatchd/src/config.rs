//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use driftwatch_domain::Subject;
use rust_decimal::Decimal;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Polling configuration
    pub poller: PollerConfig,

    /// Backing store configuration
    pub store: StoreConfig,

    /// Price source configuration
    pub source: SourceConfig,

    /// Optional prefix for generated session ids
    pub session_prefix: Option<String>,

    /// Log output format
    pub log_format: LogFormat,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// Polling configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Price pair to poll (e.g., BTCUSDT)
    pub subject: Subject,
    /// Period between polls
    pub poll_interval: Duration,
    /// Drift fraction that stops the run (0.001 = 0.1%)
    pub threshold: Decimal,
}

/// Backing store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL URI; `None` selects the in-memory store
    pub database_url: Option<String>,
    /// Maximum pooled connections
    pub max_connections: u32,
    /// Bound on connect and ping
    pub connect_timeout: Duration,
}

/// Price source configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL of the Binance REST API
    pub base_url: String,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> DaemonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = Self::load_environment(&lookup)?;
        let poller = Self::load_poller_config(&lookup)?;
        let store = Self::load_store_config(&lookup)?;
        let source = SourceConfig {
            base_url: lookup("DRIFTWATCH_SOURCE_URL")
                .unwrap_or_else(|| "https://api.binance.com".to_string()),
        };
        let session_prefix = lookup("DRIFTWATCH_SESSION_PREFIX").filter(|p| !p.trim().is_empty());
        let log_format = Self::load_log_format(&lookup)?;

        Ok(Self {
            poller,
            store,
            source,
            session_prefix,
            log_format,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            poller: PollerConfig {
                subject: default_subject(),
                poll_interval: Duration::from_millis(10),
                threshold: Decimal::new(1, 3), // 0.1%
            },
            store: StoreConfig {
                database_url: None,
                max_connections: 2,
                connect_timeout: Duration::from_millis(500),
            },
            source: SourceConfig {
                base_url: "http://127.0.0.1:9".to_string(),
            },
            session_prefix: Some("test".to_string()),
            log_format: LogFormat::Pretty,
            environment: Environment::Test,
        }
    }

    fn load_environment<F: Fn(&str) -> Option<String>>(lookup: &F) -> DaemonResult<Environment> {
        let env_str = lookup("DRIFTWATCH_ENV").unwrap_or_else(|| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid DRIFTWATCH_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_poller_config<F: Fn(&str) -> Option<String>>(lookup: &F) -> DaemonResult<PollerConfig> {
        let subject = match lookup("DRIFTWATCH_SUBJECT") {
            Some(raw) => Subject::new(raw.trim())
                .map_err(|e| DaemonError::Config(format!("Invalid DRIFTWATCH_SUBJECT: {}", e)))?,
            None => default_subject(),
        };

        let interval_ms = Self::load_u64(lookup, "DRIFTWATCH_POLL_INTERVAL_MS", 10_000)?;
        if interval_ms == 0 {
            return Err(DaemonError::Config(
                "Invalid DRIFTWATCH_POLL_INTERVAL_MS: must be > 0".to_string(),
            ));
        }

        let threshold = Self::load_decimal(lookup, "DRIFTWATCH_THRESHOLD", Decimal::new(1, 3))?;
        if threshold.is_sign_negative() && !threshold.is_zero() {
            return Err(DaemonError::Config(format!(
                "Invalid DRIFTWATCH_THRESHOLD: {} (must be >= 0)",
                threshold
            )));
        }

        Ok(PollerConfig {
            subject,
            poll_interval: Duration::from_millis(interval_ms),
            threshold,
        })
    }

    fn load_store_config<F: Fn(&str) -> Option<String>>(lookup: &F) -> DaemonResult<StoreConfig> {
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let max_connections = Self::load_u64(lookup, "DRIFTWATCH_DB_MAX_CONNECTIONS", 10)?;
        let max_connections = u32::try_from(max_connections)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                DaemonError::Config(format!(
                    "Invalid DRIFTWATCH_DB_MAX_CONNECTIONS: {}",
                    max_connections
                ))
            })?;

        let timeout_ms = Self::load_u64(lookup, "DRIFTWATCH_CONNECT_TIMEOUT_MS", 5_000)?;

        Ok(StoreConfig {
            database_url,
            max_connections,
            connect_timeout: Duration::from_millis(timeout_ms),
        })
    }

    fn load_log_format<F: Fn(&str) -> Option<String>>(lookup: &F) -> DaemonResult<LogFormat> {
        match lookup("DRIFTWATCH_LOG_FORMAT") {
            None => Ok(LogFormat::Pretty),
            Some(raw) => raw.parse(),
        }
    }

    fn load_u64<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u64) -> DaemonResult<u64> {
        match lookup(key) {
            Some(val) => val
                .trim()
                .parse::<u64>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            None => Ok(default),
        }
    }

    fn load_decimal<F: Fn(&str) -> Option<String>>(
        lookup: &F,
        key: &str,
        default: Decimal,
    ) -> DaemonResult<Decimal> {
        match lookup(key) {
            Some(val) => Decimal::from_str(val.trim())
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            None => Ok(default),
        }
    }
}

fn default_subject() -> Subject {
    Subject::new("BTCUSDT").unwrap_or_else(|_| unreachable!("literal subject is valid"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poller: PollerConfig {
                subject: default_subject(),
                poll_interval: Duration::from_secs(10),
                threshold: Decimal::new(1, 3), // 0.1%
            },
            store: StoreConfig {
                database_url: None,
                max_connections: 10,
                connect_timeout: Duration::from_secs(5),
            },
            source: SourceConfig {
                base_url: "https://api.binance.com".to_string(),
            },
            session_prefix: None,
            log_format: LogFormat::Pretty,
            environment: Environment::Development,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(DaemonError::Config(format!(
                "Invalid DRIFTWATCH_LOG_FORMAT: {}. Expected: pretty, json",
                other
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> DaemonResult<Config> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.poller.subject.as_str(), "BTCUSDT");
        assert_eq!(config.poller.poll_interval, Duration::from_secs(10));
        assert_eq!(config.environment, Environment::Development);
    }

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.environment, Environment::Test);
        assert!(config.store.database_url.is_none());
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = from_pairs(&[]).unwrap();
        let defaults = Config::default();

        assert_eq!(config.poller.subject, defaults.poller.subject);
        assert_eq!(config.poller.poll_interval, defaults.poller.poll_interval);
        assert_eq!(config.poller.threshold, dec!(0.001));
        assert_eq!(config.store.max_connections, 10);
        assert_eq!(config.store.connect_timeout, Duration::from_millis(5000));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.session_prefix.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("DRIFTWATCH_ENV", "prod"),
            ("DRIFTWATCH_SUBJECT", "ETHUSDT"),
            ("DRIFTWATCH_POLL_INTERVAL_MS", "250"),
            ("DRIFTWATCH_THRESHOLD", "0.02"),
            ("DATABASE_URL", "postgres://u:p@localhost/driftwatch"),
            ("DRIFTWATCH_DB_MAX_CONNECTIONS", "4"),
            ("DRIFTWATCH_SESSION_PREFIX", "nightly"),
            ("DRIFTWATCH_LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.poller.subject.as_str(), "ETHUSDT");
        assert_eq!(config.poller.poll_interval, Duration::from_millis(250));
        assert_eq!(config.poller.threshold, dec!(0.02));
        assert_eq!(config.store.database_url.as_deref(), Some("postgres://u:p@localhost/driftwatch"));
        assert_eq!(config.store.max_connections, 4);
        assert_eq!(config.session_prefix.as_deref(), Some("nightly"));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let cases = [
            ("DRIFTWATCH_ENV", "staging"),
            ("DRIFTWATCH_SUBJECT", "BTC USDT"),
            ("DRIFTWATCH_POLL_INTERVAL_MS", "0"),
            ("DRIFTWATCH_POLL_INTERVAL_MS", "soon"),
            ("DRIFTWATCH_THRESHOLD", "-0.1"),
            ("DRIFTWATCH_DB_MAX_CONNECTIONS", "0"),
            ("DRIFTWATCH_LOG_FORMAT", "xml"),
        ];

        for (key, value) in cases {
            match from_pairs(&[(key, value)]) {
                Err(DaemonError::Config(msg)) => assert!(msg.contains(key), "{}", msg),
                other => panic!("{}={} should fail, got {:?}", key, value, other),
            }
        }
    }

    #[test]
    fn test_blank_database_url_means_memory() {
        let config = from_pairs(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(config.store.database_url.is_none());
    }
}
