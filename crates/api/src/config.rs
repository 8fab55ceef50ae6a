//! Application configuration loaded from environment variables.

use std::time::Duration;

use placement::PlacementConfig;
use placement::config::DEFAULT_TRACKING_BASE_URL;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON logs (default: pretty)
/// - `DATABASE_URL`: PostgreSQL URL; the in-memory store is used when unset
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `TRANSACTION_TIMEOUT_MS`: bound on one transaction (default: `5000`)
/// - `LOCK_TIMEOUT_MS`: PostgreSQL `lock_timeout` (default: `3000`)
/// - `TRACKING_BASE_URL`: prefix of tracking references
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub transaction_timeout: Duration,
    pub lock_timeout: Duration,
    pub tracking_base_url: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            transaction_timeout: millis("TRANSACTION_TIMEOUT_MS", defaults.transaction_timeout),
            lock_timeout: millis("LOCK_TIMEOUT_MS", defaults.lock_timeout),
            tracking_base_url: lookup("TRACKING_BASE_URL").unwrap_or(defaults.tracking_base_url),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Placement tuning derived from this configuration.
    pub fn placement(&self) -> PlacementConfig {
        PlacementConfig {
            transaction_timeout: self.transaction_timeout,
            tracking_base_url: self.tracking_base_url.clone(),
            ..PlacementConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            transaction_timeout: Duration::from_millis(5000),
            lock_timeout: Duration::from_millis(3000),
            tracking_base_url: DEFAULT_TRACKING_BASE_URL.to_string(),
        }
    }
}
