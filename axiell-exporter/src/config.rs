//! Configuration for the Axiell exporter.

use std::path::Path;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Metrics endpoint settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Upstream Axiell API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Dataset classification settings.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Address to listen on (default: "0.0.0.0:9037").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Upper bound for a whole scrape request (seconds).
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,
}

fn default_listen() -> String {
    "0.0.0.0:9037".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_scrape_timeout() -> u64 {
    30
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            scrape_timeout_secs: default_scrape_timeout(),
        }
    }
}

/// Upstream API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the `wwwopac.ashx` endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// `limit` sent with the database listing request (null = omit).
    #[serde(default = "default_list_limit")]
    pub list_limit: Option<u32>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// How many dataset counts are fetched in parallel during a scrape.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

fn default_base_url() -> String {
    "http://localhost/api/wwwopac.ashx".to_string()
}

fn default_list_limit() -> Option<u32> {
    Some(100)
}

fn default_timeout() -> u64 {
    10
}

fn default_max_concurrent_fetches() -> usize {
    4
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            list_limit: default_list_limit(),
            timeout_secs: default_timeout(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

/// Dataset classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Derive `collection_type` from the dataset name prefix. When disabled,
    /// every dataset is reported as "unknown" under its full name.
    #[serde(default = "default_classifier_enabled")]
    pub enabled: bool,
}

fn default_classifier_enabled() -> bool {
    true
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: default_classifier_enabled(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.web.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.web.listen
            )));
        }

        if !self.web.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.web.path == "/health" {
            return Err(ConfigError::Validation(
                "Metrics path must not be /health".to_string(),
            ));
        }

        if self.web.scrape_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "scrape_timeout_secs must be > 0".to_string(),
            ));
        }

        match Url::parse(&self.api.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::Validation(format!(
                    "Unsupported base URL scheme: {}",
                    url.scheme()
                )));
            }
            Err(e) => {
                return Err(ConfigError::Validation(format!(
                    "Invalid base URL {}: {}",
                    self.api.base_url, e
                )));
            }
        }

        if self.api.list_limit == Some(0) {
            return Err(ConfigError::Validation(
                "list_limit must be > 0 or null".to_string(),
            ));
        }

        if self.api.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        if self.api.max_concurrent_fetches == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent_fetches must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
