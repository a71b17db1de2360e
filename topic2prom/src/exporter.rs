//! Rendering of the registry in OpenMetrics text format.
//!
//! Topic gauges are exposed through a [`Collector`] that reads a registry
//! snapshot on every scrape. The exporter's own counters live in the same
//! `prometheus_client` registry under the `topic2prom_` prefix.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::registry::Registry;

use crate::mapping::{MetricId, Subject};
use crate::registry::SharedRegistry;

/// Help text for gauges whose topic is unknown to the exporter.
const DEFAULT_HELP: &str = "Latest value published on the broker";

/// Content type of the rendered output.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Counters describing the exporter itself.
#[derive(Debug, Clone, Default)]
pub struct ExporterMetrics {
    /// Messages delivered by the broker.
    pub messages_received: Counter,
    /// Messages whose payload was not a number.
    pub decode_errors: Counter,
    /// Messages on topics with no route.
    pub unrouted_messages: Counter,
    /// Subscribe requests that failed or timed out.
    pub subscribe_failures: Counter,
    /// Successful (re)connections.
    pub connects: Counter,
    /// Connections lost after being established.
    pub connection_losses: Counter,
}

impl ExporterMetrics {
    fn register(&self, registry: &mut Registry) {
        registry.register(
            "messages_received",
            "Messages delivered by the broker",
            self.messages_received.clone(),
        );
        registry.register(
            "decode_errors",
            "Messages dropped because the payload was not a number",
            self.decode_errors.clone(),
        );
        registry.register(
            "unrouted_messages",
            "Messages dropped because their topic is not configured",
            self.unrouted_messages.clone(),
        );
        registry.register(
            "subscribe_failures",
            "Subscribe requests that failed or timed out",
            self.subscribe_failures.clone(),
        );
        registry.register(
            "connects",
            "Successful connections to the broker",
            self.connects.clone(),
        );
        registry.register(
            "connection_losses",
            "Connections to the broker lost after being established",
            self.connection_losses.clone(),
        );
    }
}

/// Collector exposing every registry cell as a gauge.
#[derive(Debug)]
struct GaugeCollector {
    registry: SharedRegistry,
    help: HashMap<MetricId, String>,
}

impl Collector for GaugeCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        for (id, value) in self.registry.snapshot() {
            let help = self.help.get(&id).map_or(DEFAULT_HELP, String::as_str);
            let metric_encoder =
                encoder.encode_descriptor(id.as_str(), help, None, MetricType::Gauge)?;

            // Unset cells are announced without a sample. The text encoder
            // writes infinities as `inf`, which scrapers reject.
            if let Some(value) = value.filter(|v| !v.is_infinite()) {
                ConstGauge::new(value).encode(metric_encoder)?;
            }
        }
        Ok(())
    }
}

/// Renders topic gauges and exporter counters for a scrape.
#[derive(Debug)]
pub struct MetricsExporter {
    registry: Registry,
}

impl MetricsExporter {
    pub fn new(cells: SharedRegistry, subjects: &[Subject], metrics: &ExporterMetrics) -> Self {
        let mut registry = Registry::default();
        metrics.register(registry.sub_registry_with_prefix("topic2prom"));

        let help = subjects
            .iter()
            .map(|subject| (subject.metric.clone(), subject.help()))
            .collect();
        registry.register_collector(Box::new(GaugeCollector {
            registry: cells,
            help,
        }));

        Self { registry }
    }

    /// Encode all metrics in OpenMetrics text format.
    pub fn render(&self) -> Result<String, fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

/// Create a shareable exporter handle.
pub type SharedExporter = Arc<MetricsExporter>;
