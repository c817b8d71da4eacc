use crate::errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Redis store configuration.
#[derive(Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Redis server hostname
    pub redis_host: String,
    /// Redis server port
    pub redis_port: u16,
    /// Redis database index
    pub redis_db: u16,
    /// Optional Redis username
    pub redis_username: Option<String>,
    /// Optional Redis password
    pub redis_password: Option<String>,
    /// Connection pool size
    pub pool_size: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_db: 0,
            redis_username: None,
            redis_password: None,
            pool_size: None,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("redis_host", &self.redis_host)
            .field("redis_port", &self.redis_port)
            .field("redis_db", &self.redis_db)
            .field("redis_username", &self.redis_username)
            .field(
                "redis_password",
                &self.redis_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// Monitor sink configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MonitorConfig {
    /// Shared event stream key (namespaced by the facade)
    pub stream: String,
    /// Approximate cap on the event stream length (oldest entries evicted)
    pub max_len: u64,
    /// Prefix prepended to the source fact at ingestion
    pub source_prefix: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stream: "monitor:x".to_string(),
            max_len: 999_000,
            source_prefix: "lf".to_string(),
        }
    }
}

/// Scheduling loop configuration. The delay is carried as a string and parsed
/// strictly when a unit instance is constructed.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoopConfig {
    pub delay: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            delay: "2000".to_string(),
        }
    }
}

/// Consumer-group stream read configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InputStreamConfig {
    /// COUNT passed to each consumer-group read
    pub read_count: usize,
}

impl Default for InputStreamConfig {
    fn default() -> Self {
        Self { read_count: 10 }
    }
}

/// Aggregation unit configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AggregationConfig {
    /// Minimum age in milliseconds a leaf period must reach before rollup
    pub lag_ms: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self { lag_ms: 60_000 }
    }
}

/// Health API configuration.
#[derive(Serialize, Deserialize, Clone)]
pub struct Api {
    /// Port number for the health listener
    pub port: u16,
    /// Optional API key for authentication
    pub api_key: Option<String>,
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}

/// Logger output configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LoggerSection {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: Option<String>,
    /// Optional file path for rolling log output
    pub file_path: Option<String>,
    /// Whether to enable console output (default: true)
    pub console: Option<bool>,
    /// Whether to use JSON format for logs
    pub json: Option<bool>,
}

/// Main configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Application instance name, used as the store key namespace
    pub name: String,
    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Monitor sink configuration
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Scheduling loop configuration
    #[serde(rename = "loop", default)]
    pub unit_loop: LoopConfig,
    /// Consumer-group read configuration
    #[serde(default)]
    pub input_stream: InputStreamConfig,
    /// Aggregation configuration
    #[serde(default)]
    pub aggregation: AggregationConfig,
    /// Health API configuration
    pub api: Option<Api>,
    /// Logger configuration
    pub logger: Option<LoggerSection>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "lattice".to_string(),
            store: StoreConfig::default(),
            monitor: MonitorConfig::default(),
            unit_loop: LoopConfig::default(),
            input_stream: InputStreamConfig::default(),
            aggregation: AggregationConfig::default(),
            api: None,
            logger: None,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(Box::new(e)))?;
        let config: Config =
            toml::from_str(&config_str).map_err(|e| ConfigError::Parse(Box::new(e)))?;
        Ok(config)
    }
}
