//! Configuration for the exporter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use topic2prom_common::config::{LoggingConfig, ZenohConfig};

use crate::mapping::{MetricId, RESERVED_PREFIX, Subject, is_reserved, is_valid_metric_name};

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
    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// HTTP endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Topics to export.
    #[serde(default)]
    pub scraping: ScrapingConfig,

    /// Broker timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP scrape endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:2112").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:2112".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Topics whose payload is a single number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapingConfig {
    /// Topics exported as one gauge each.
    #[serde(default)]
    pub simple: Vec<String>,
}

/// Bounded waits on broker operations, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout_ms")]
    pub connect_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub subscribe_ms: u64,

    /// Drain time for closing the session on shutdown.
    #[serde(default = "default_timeout_ms")]
    pub disconnect_ms: u64,

    /// How often the broker link is checked for loss and recovery.
    #[serde(default = "default_timeout_ms")]
    pub link_check_interval_ms: u64,
}

fn default_timeout_ms() -> u64 {
    1000
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn subscribe(&self) -> Duration {
        Duration::from_millis(self.subscribe_ms)
    }

    pub fn disconnect(&self) -> Duration {
        Duration::from_millis(self.disconnect_ms)
    }

    pub fn link_check_interval(&self) -> Duration {
        Duration::from_millis(self.link_check_interval_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_timeout_ms(),
            subscribe_ms: default_timeout_ms(),
            disconnect_ms: default_timeout_ms(),
            link_check_interval_ms: default_timeout_ms(),
        }
    }
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

    /// The configured topics paired with their metric identifiers.
    pub fn subjects(&self) -> Vec<Subject> {
        self.scraping.simple.iter().map(Subject::new).collect()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .http
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.http.listen
            )));
        }

        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        let timeouts = [
            ("connect_ms", self.timeouts.connect_ms),
            ("subscribe_ms", self.timeouts.subscribe_ms),
            ("disconnect_ms", self.timeouts.disconnect_ms),
            ("link_check_interval_ms", self.timeouts.link_check_interval_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{} must be > 0", name)));
            }
        }

        self.validate_topics()
    }

    fn validate_topics(&self) -> Result<(), ConfigError> {
        let mut seen: HashMap<MetricId, &str> = HashMap::new();

        for topic in &self.scraping.simple {
            if topic.is_empty() {
                return Err(ConfigError::Validation("Empty topic".to_string()));
            }

            if topic.contains('*') || topic.contains('$') {
                return Err(ConfigError::Validation(format!(
                    "Topic '{}' must not contain wildcards",
                    topic
                )));
            }

            if let Err(e) = zenoh::key_expr::KeyExpr::try_from(topic.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Topic '{}' is not a valid key expression: {}",
                    topic, e
                )));
            }

            let metric = MetricId::derive(topic);

            if !is_valid_metric_name(metric.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Topic '{}' maps to invalid metric name '{}'",
                    topic, metric
                )));
            }

            if is_reserved(metric.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Topic '{}' maps to metric '{}' which uses the reserved prefix '{}'",
                    topic, metric, RESERVED_PREFIX
                )));
            }

            if let Some(previous) = seen.insert(metric.clone(), topic) {
                return Err(ConfigError::Validation(format!(
                    "Topics '{}' and '{}' both map to metric '{}'",
                    previous, topic, metric
                )));
            }
        }

        Ok(())
    }
}
