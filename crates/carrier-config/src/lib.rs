//! Carrier Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub sender: SenderConfig,
    pub redis: RedisConfig,
    pub logs: ChannelLogConfig,

    /// Public domain used to build callback URLs handed to providers,
    /// e.g. `https://courier.example.com`.
    pub domain: String,

    /// Secrets that must never appear in channel logs, in addition to
    /// per-channel redaction values.
    pub secrets: Vec<String>,

    /// Enable development mode (in-memory backend, seeded channels).
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            sender: SenderConfig::default(),
            redis: RedisConfig::default(),
            logs: ChannelLogConfig::default(),
            domain: "http://localhost:8080".to_string(),
            secrets: Vec::new(),
            dev_mode: false,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    /// Cap on inbound webhook bodies, in bytes.
    pub max_body_bytes: usize,
    /// Server-side request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            max_body_bytes: 1024 * 1024,
            request_timeout_secs: 60,
        }
    }
}

/// Outbound sender pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Number of send workers.
    pub workers: usize,
    /// Per-call timeout for outbound provider requests, in seconds.
    pub request_timeout_secs: u64,
    /// Timeout for media fetches, in seconds.
    pub media_timeout_secs: u64,
    /// How long to wait for in-flight sends on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            workers: 32,
            request_timeout_secs: 30,
            media_timeout_secs: 15,
            shutdown_grace_secs: 30,
        }
    }
}

/// Redis configuration (token caches and handler-local state)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Channel log persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelLogConfig {
    /// Days until persisted logs expire.
    pub ttl_days: u32,
    /// Items per batch write.
    pub batch_size: usize,
    /// Flush interval for partial batches, in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for ChannelLogConfig {
    fn default() -> Self {
        Self {
            ttl_days: 7,
            batch_size: 25,
            flush_interval_ms: 1_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Carrier Configuration
# Environment variables (CARRIER_*) override these settings

domain = "https://courier.example.com"
secrets = []
dev_mode = false

[http]
port = 8080
host = "0.0.0.0"
max_body_bytes = 1048576
request_timeout_secs = 60

[sender]
workers = 32
request_timeout_secs = 30
media_timeout_secs = 15
shutdown_grace_secs = 30

[redis]
url = "redis://localhost:6379"

[logs]
ttl_days = 7
batch_size = 25
flush_interval_ms = 1000
"#
        .to_string()
    }
}
