//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "carrier.toml",
    "./config/config.toml",
    "/etc/carrier/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("CARRIER_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("CARRIER_DOMAIN") {
            config.domain = val;
        }
        if let Ok(val) = env::var("CARRIER_SECRETS") {
            config.secrets = val.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(val) = env::var("CARRIER_DEV_MODE") {
            config.dev_mode = val == "true" || val == "1";
        }

        // HTTP
        if let Ok(val) = env::var("CARRIER_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("CARRIER_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("CARRIER_HTTP_MAX_BODY_BYTES") {
            if let Ok(bytes) = val.parse() {
                config.http.max_body_bytes = bytes;
            }
        }

        // Sender pool
        if let Ok(val) = env::var("CARRIER_SENDER_WORKERS") {
            if let Ok(workers) = val.parse() {
                config.sender.workers = workers;
            }
        }
        if let Ok(val) = env::var("CARRIER_SENDER_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.sender.request_timeout_secs = secs;
            }
        }
        if let Ok(val) = env::var("CARRIER_SENDER_MEDIA_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.sender.media_timeout_secs = secs;
            }
        }

        // Redis
        if let Ok(val) = env::var("CARRIER_REDIS_URL") {
            config.redis.url = val;
        }

        // Channel logs
        if let Ok(val) = env::var("CARRIER_LOGS_TTL_DAYS") {
            if let Ok(days) = val.parse() {
                config.logs.ttl_days = days;
            }
        }
        if let Ok(val) = env::var("CARRIER_LOGS_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.logs.batch_size = size;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
