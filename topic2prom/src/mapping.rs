//! Mapping from broker topics to Prometheus metric identifiers.

use std::fmt;

/// Separator between the chunks of a topic.
pub const TOPIC_DELIMITER: char = '/';

/// Prefix reserved for the exporter's own metrics.
pub const RESERVED_PREFIX: &str = "topic2prom_";

/// A Prometheus metric name derived from a topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricId(String);

impl MetricId {
    /// Derive the metric identifier for a topic.
    ///
    /// Every topic delimiter is replaced with an underscore; nothing else
    /// changes, so `sensors/room1/temp` becomes `sensors_room1_temp`.
    pub fn derive(topic: &str) -> Self {
        Self(topic.replace(TOPIC_DELIMITER, "_"))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MetricId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A configured topic together with the metric it feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub topic: String,
    pub metric: MetricId,
}

impl Subject {
    pub fn new(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        let metric = MetricId::derive(&topic);
        Self { topic, metric }
    }

    /// Help text shown next to the metric in the exposition output.
    pub fn help(&self) -> String {
        format!("Latest value published on {}", self.topic)
    }
}

/// Check that a name matches `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Whether a name collides with the exporter's own metric namespace.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}
