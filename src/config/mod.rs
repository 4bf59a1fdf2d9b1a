//! Configuration management for the cost dashboard.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Kraken Futures API access
    #[serde(default)]
    pub kraken: KrakenConfig,
    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Dashboard behaviour (windows, limits, cooldowns)
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Development mode: credential cookies are sent without `Secure`
    #[serde(default)]
    pub debug: bool,
    /// Directory holding the frontend bundle (`index.html` + assets)
    #[serde(default)]
    pub static_dir: Option<String>,
    /// Directory for rolling log files
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KrakenConfig {
    /// REST endpoint root
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Server-side fallback API key (used when the browser sends no cookies)
    #[serde(default)]
    pub api_key: String,
    /// Server-side fallback API secret (base64, as issued by Kraken)
    #[serde(default)]
    pub api_secret: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per request before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles after each failed attempt
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    /// Pause between account-log pages
    #[serde(default = "default_log_page_delay_ms")]
    pub log_page_delay_ms: u64,
    /// Pause between execution pages
    #[serde(default = "default_execution_page_delay_ms")]
    pub execution_page_delay_ms: u64,
    /// Upper bound on parallel requests in batch operations
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// Where cached responses live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,
    /// SQLite file for the `sqlite` backend
    #[serde(default = "default_cache_path")]
    pub path: String,
    /// Lifetime of processed account history
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Lifetime of the public fee schedule table
    #[serde(default = "default_fee_schedule_ttl_secs")]
    pub fee_schedule_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Days of history fetched on refresh (charts are sliced from this)
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    /// Minimum seconds between credential submissions
    #[serde(default = "default_credential_cooldown_secs")]
    pub credential_cooldown_secs: u64,
    /// Maximum symbols accepted by the batch ticker endpoint
    #[serde(default = "default_max_batch_symbols")]
    pub max_batch_symbols: usize,
    /// Fee rate used to estimate notional volume when an execution has no USD value
    #[serde(default = "default_fallback_maker_fee")]
    pub fallback_maker_fee: Decimal,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_base_url() -> String {
    "https://futures.kraken.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    10_000
}

fn default_log_page_delay_ms() -> u64 {
    1_000
}

fn default_execution_page_delay_ms() -> u64 {
    500
}

fn default_max_concurrency() -> usize {
    5
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Memory
}

fn default_cache_path() -> String {
    ".cache/dashboard.db".to_string()
}

fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_fee_schedule_ttl_secs() -> u64 {
    3_600
}

fn default_history_days() -> u32 {
    90
}

fn default_credential_cooldown_secs() -> u64 {
    30
}

fn default_max_batch_symbols() -> usize {
    50
}

fn default_fallback_maker_fee() -> Decimal {
    Decimal::new(1, 4) // 0.0001 (0.01% maker)
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("DASH"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.cache.ttl_secs > 0, "cache.ttl_secs must be positive");
        anyhow::ensure!(
            self.cache.fee_schedule_ttl_secs > 0,
            "cache.fee_schedule_ttl_secs must be positive"
        );
        anyhow::ensure!(
            self.kraken.max_concurrency > 0,
            "kraken.max_concurrency must be positive"
        );
        anyhow::ensure!(self.kraken.max_retries > 0, "kraken.max_retries must be positive");
        anyhow::ensure!(
            (1..=365).contains(&self.dashboard.history_days),
            "dashboard.history_days must be between 1 and 365"
        );
        anyhow::ensure!(
            self.dashboard.fallback_maker_fee > Decimal::ZERO,
            "dashboard.fallback_maker_fee must be positive"
        );

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl KrakenConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn log_page_delay(&self) -> Duration {
        Duration::from_millis(self.log_page_delay_ms)
    }

    pub fn execution_page_delay(&self) -> Duration {
        Duration::from_millis(self.execution_page_delay_ms)
    }

    /// Config pointed at a local endpoint with no pacing, for tests and mocks.
    pub fn for_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            initial_retry_delay_ms: 0,
            log_page_delay_ms: 0,
            execution_page_delay_ms: 0,
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            static_dir: None,
            log_dir: default_log_dir(),
        }
    }
}

impl Default for KrakenConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            api_secret: String::new(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            log_page_delay_ms: default_log_page_delay_ms(),
            execution_page_delay_ms: default_execution_page_delay_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            path: default_cache_path(),
            ttl_secs: default_ttl_secs(),
            fee_schedule_ttl_secs: default_fee_schedule_ttl_secs(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            history_days: default_history_days(),
            credential_cooldown_secs: default_credential_cooldown_secs(),
            max_batch_symbols: default_max_batch_symbols(),
            fallback_maker_fee: default_fallback_maker_fee(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_rejects_out_of_range_history() {
        let mut config = Config::default();
        config.dashboard.history_days = 0;
        assert!(config.validate().is_err());

        config.dashboard.history_days = 400;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_for_base_url_disables_pacing() {
        let kraken = KrakenConfig::for_base_url("http://127.0.0.1:9999/");
        assert_eq!(kraken.base_url, "http://127.0.0.1:9999");
        assert_eq!(kraken.log_page_delay(), Duration::ZERO);
        assert_eq!(kraken.max_retries, 3);
    }
}
