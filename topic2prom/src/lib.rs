//! Zenoh topic to Prometheus gauge exporter.
//!
//! Subscribes to a fixed list of Zenoh topics, reads each message as a
//! single number, keeps the latest value per topic and serves all values on
//! an HTTP scrape endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────────┐     ┌─────────────────┐
//! │  Zenoh Network  │────>│ SubscriptionManager  │────>│ MetricRegistry  │
//! │ (ZenohBroker)   │     │  (decode + route)    │     │ (latest values) │
//! └─────────────────┘     └──────────────────────┘     └────────┬────────┘
//!                                                               │
//!                         ┌──────────────────────┐              │
//!                         │ HttpServer /metrics  │<─────────────┘
//!                         │  (MetricsExporter)   │
//!                         └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! topic2prom --config topic2prom.json5
//! ```
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod broker;
pub mod config;
pub mod decoder;
pub mod exporter;
pub mod http;
pub mod mapping;
pub mod registry;
pub mod subscription;
pub mod zenoh_broker;

pub use broker::{Broker, BrokerError, BrokerEvents, MessageSink, SetupReport};
pub use config::ExporterConfig;
pub use decoder::{DecodeError, decode};
pub use exporter::{ExporterMetrics, MetricsExporter, SharedExporter};
pub use http::HttpServer;
pub use mapping::{MetricId, Subject};
pub use registry::{CellHandle, MetricRegistry, SharedRegistry};
pub use subscription::{ConnectionState, SharedManager, SubscriptionManager};
pub use zenoh_broker::ZenohBroker;
