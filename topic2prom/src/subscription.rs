//! Subscription manager: keeps broker subscriptions and registry cells in
//! step with the connection lifecycle.
//!
//! Every connect event replays the full topic list. Registration and routing
//! are idempotent, so reconnects never create duplicate cells.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};

use crate::broker::{Broker, BrokerEvents, MessageSink, SetupReport};
use crate::decoder::decode;
use crate::exporter::ExporterMetrics;
use crate::mapping::Subject;
use crate::registry::{CellHandle, SharedRegistry};

/// Connection state as seen by the subscription manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Subscribing,
    Active,
    Reconnecting,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Subscribing,
            3 => Self::Active,
            4 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routes broker messages into registry cells.
pub struct SubscriptionManager {
    registry: SharedRegistry,
    subjects: Vec<Subject>,
    /// Topic to cell, filled as subjects are registered.
    routes: RwLock<HashMap<String, CellHandle>>,
    state: AtomicU8,
    metrics: ExporterMetrics,
}

impl SubscriptionManager {
    pub fn new(registry: SharedRegistry, subjects: Vec<Subject>, metrics: ExporterMetrics) -> Self {
        Self {
            registry,
            subjects,
            routes: RwLock::new(HashMap::new()),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            metrics,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, next: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if previous != next {
            debug!(from = %previous, to = %next, "Connection state changed");
        }
    }

    /// Register every subject's cell ahead of the first connection so the
    /// metrics are visible, unset, before any subscription exists.
    pub fn preregister(&self) {
        for subject in &self.subjects {
            self.register(subject);
        }
    }

    fn register(&self, subject: &Subject) -> CellHandle {
        let cell = self.registry.ensure(&subject.metric);
        self.routes
            .write()
            .entry(subject.topic.clone())
            .or_insert_with(|| cell.clone());
        cell
    }

    /// Number of topics with a route to a cell.
    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }
}

impl MessageSink for SubscriptionManager {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self.metrics.messages_received.inc();

        let cell = self.routes.read().get(topic).cloned();
        let Some(cell) = cell else {
            self.metrics.unrouted_messages.inc();
            debug!(topic, "Dropping message on unconfigured topic");
            return;
        };

        match decode(topic, payload) {
            Ok(value) => {
                self.registry.set(&cell, value);
                trace!(topic, value, "Received value");
            }
            Err(e) => {
                self.metrics.decode_errors.inc();
                warn!(
                    topic = %e.topic,
                    payload = %e.payload,
                    error = %e.reason,
                    "Invalid value"
                );
            }
        }
    }
}

impl<B: Broker> BrokerEvents<B> for SubscriptionManager {
    fn on_connecting(&self) {
        self.transition(ConnectionState::Connecting);
    }

    async fn on_connect(&self, broker: &B) -> SetupReport {
        self.transition(ConnectionState::Subscribing);
        self.metrics.connects.inc();

        let mut report = SetupReport::default();

        for subject in &self.subjects {
            self.register(subject);

            match broker.subscribe(&subject.topic).await {
                Ok(()) => {
                    info!(
                        topic = %subject.topic,
                        metric = %subject.metric,
                        "Subscribed to topic"
                    );
                    report.subscribed.push(subject.topic.clone());
                }
                Err(e) => {
                    self.metrics.subscribe_failures.inc();
                    error!(topic = %subject.topic, error = %e, "Failed to subscribe");
                    report.failed.push((subject.topic.clone(), e.to_string()));
                }
            }
        }

        self.transition(ConnectionState::Active);
        info!(
            subscribed = report.subscribed.len(),
            failed = report.failed.len(),
            gauges = self.registry.len(),
            "Subscription setup finished"
        );

        report
    }

    fn on_connection_lost(&self, reason: &str) {
        self.metrics.connection_losses.inc();
        self.transition(ConnectionState::Reconnecting);
        warn!(reason, "Connection to broker lost, keeping last known values");
    }

    fn on_reconnecting(&self) {
        self.transition(ConnectionState::Connecting);
        info!("Reconnecting to broker");
    }
}

/// Create a shareable manager handle.
pub type SharedManager = Arc<SubscriptionManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::mapping::MetricId;
    use crate::registry::MetricRegistry;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Broker double recording subscribe calls and failing chosen topics.
    #[derive(Default)]
    struct MockBroker {
        calls: Mutex<Vec<String>>,
        failing: HashSet<String>,
    }

    impl MockBroker {
        fn failing(topics: &[&str]) -> Self {
            Self {
                failing: topics.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl Broker for MockBroker {
        async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
            self.calls.lock().push(topic.to_string());
            if self.failing.contains(topic) {
                return Err(BrokerError::Subscribe {
                    topic: topic.to_string(),
                    message: "not authorized".to_string(),
                });
            }
            Ok(())
        }
    }

    fn manager(topics: &[&str]) -> (SubscriptionManager, SharedRegistry, ExporterMetrics) {
        let registry = Arc::new(MetricRegistry::new());
        let metrics = ExporterMetrics::default();
        let subjects = topics.iter().map(|t| Subject::new(*t)).collect();
        let manager = SubscriptionManager::new(registry.clone(), subjects, metrics.clone());
        (manager, registry, metrics)
    }

    fn value(registry: &MetricRegistry, topic: &str) -> Option<f64> {
        registry.get(&MetricId::derive(topic)).and_then(|c| c.get())
    }

    #[tokio::test]
    async fn test_repeated_connect_registers_once() {
        let (manager, registry, metrics) = manager(&["a/1", "a/2", "b/1"]);
        let broker = MockBroker::default();

        for _ in 0..5 {
            let report = manager.on_connect(&broker).await;
            assert!(report.is_complete());
        }

        assert_eq!(registry.len(), 3);
        assert_eq!(manager.route_count(), 3);
        assert_eq!(broker.calls.lock().len(), 15);
        assert_eq!(metrics.connects.get(), 5);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_values() {
        let (manager, registry, _) = manager(&["a/1"]);
        let broker = MockBroker::default();

        manager.on_connect(&broker).await;
        manager.on_message("a/1", b"42");

        BrokerEvents::<MockBroker>::on_connection_lost(&manager, "link down");
        assert_eq!(value(&registry, "a/1"), Some(42.0));

        manager.on_connect(&broker).await;
        assert_eq!(value(&registry, "a/1"), Some(42.0));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_decode_failure_preserves_value() {
        let (manager, registry, metrics) = manager(&["sensors/room1/temp"]);
        manager.on_connect(&MockBroker::default()).await;

        manager.on_message("sensors/room1/temp", b"21.5");
        manager.on_message("sensors/room1/temp", b"abc");

        assert_eq!(value(&registry, "sensors/room1/temp"), Some(21.5));
        assert_eq!(metrics.decode_errors.get(), 1);
        assert_eq!(metrics.messages_received.get(), 2);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let (manager, registry, _) = manager(&["a/1"]);
        manager.on_connect(&MockBroker::default()).await;

        manager.on_message("a/1", b"10.0");
        manager.on_message("a/1", b"12.3");

        assert_eq!(value(&registry, "a/1"), Some(12.3));
    }

    #[tokio::test]
    async fn test_partial_subscribe_failure() {
        let (manager, registry, metrics) = manager(&["a/1", "a/2"]);
        let broker = MockBroker::failing(&["a/2"]);

        let report = manager.on_connect(&broker).await;

        assert_eq!(report.subscribed, vec!["a/1".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a/2");
        assert_eq!(metrics.subscribe_failures.get(), 1);
        assert_eq!(manager.state(), ConnectionState::Active);

        manager.on_message("a/1", b"5");
        assert_eq!(value(&registry, "a/1"), Some(5.0));
        assert_eq!(value(&registry, "a/2"), None);
    }

    #[tokio::test]
    async fn test_unrouted_message_is_dropped() {
        let (manager, registry, metrics) = manager(&["a/1"]);
        manager.on_connect(&MockBroker::default()).await;

        manager.on_message("a/9", b"1");

        assert_eq!(registry.len(), 1);
        assert_eq!(metrics.unrouted_messages.get(), 1);
    }

    #[test]
    fn test_preregister_exposes_unset_cells() {
        let (manager, registry, _) = manager(&["a/1", "a/2"]);
        manager.preregister();
        manager.preregister();

        assert_eq!(
            registry.snapshot(),
            vec![
                (MetricId::derive("a/1"), None),
                (MetricId::derive("a/2"), None)
            ]
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_preregistered_route_accepts_messages() {
        let (manager, registry, _) = manager(&["a/1"]);
        manager.preregister();

        manager.on_message("a/1", b"3.5");

        assert_eq!(value(&registry, "a/1"), Some(3.5));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (manager, _, metrics) = manager(&["a/1"]);
        let broker = MockBroker::default();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        BrokerEvents::<MockBroker>::on_connecting(&manager);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.on_connect(&broker).await;
        assert_eq!(manager.state(), ConnectionState::Active);

        BrokerEvents::<MockBroker>::on_connection_lost(&manager, "timeout");
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(metrics.connection_losses.get(), 1);

        BrokerEvents::<MockBroker>::on_reconnecting(&manager);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.on_connect(&broker).await;
        assert_eq!(manager.state(), ConnectionState::Active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_delivery_and_scrape() {
        let topics: Vec<String> = (0..16).map(|i| format!("load/{}", i)).collect();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        let (manager, registry, metrics) = manager(&topic_refs);
        manager.on_connect(&MockBroker::default()).await;
        let manager = Arc::new(manager);

        let mut tasks = Vec::new();
        for topic in topics.clone() {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..500 {
                    manager.on_message(&topic, i.to_string().as_bytes());
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for _ in 0..4 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let snapshot = registry.snapshot();
                    assert_eq!(snapshot.len(), 16);
                    for (_, value) in snapshot {
                        if let Some(value) = value {
                            assert!(value.fract() == 0.0 && (0.0..500.0).contains(&value));
                        }
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(metrics.messages_received.get(), 16 * 500);
        for topic in &topics {
            assert_eq!(value(&registry, topic), Some(499.0));
        }
    }

    #[test]
    fn test_state_is_stored_losslessly() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Subscribing,
            ConnectionState::Active,
            ConnectionState::Reconnecting,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    /// Event seen by [`RecordingSubscriber`].
    #[derive(Debug, Clone, Default)]
    struct CapturedEvent {
        level: Option<tracing::Level>,
        fields: HashMap<String, String>,
    }

    impl tracing::field::Visit for CapturedEvent {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
            self.fields
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSubscriber {
        events: Arc<Mutex<Vec<CapturedEvent>>>,
    }

    impl RecordingSubscriber {
        fn warnings(&self) -> Vec<CapturedEvent> {
            self.events
                .lock()
                .iter()
                .filter(|e| e.level == Some(tracing::Level::WARN))
                .cloned()
                .collect()
        }
    }

    impl tracing::Subscriber for RecordingSubscriber {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }

        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            let mut captured = CapturedEvent {
                level: Some(*event.metadata().level()),
                ..Default::default()
            };
            event.record(&mut captured);
            self.events.lock().push(captured);
        }

        fn enter(&self, _: &tracing::span::Id) {}

        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn test_decode_failure_logs_one_warning() {
        let (manager, registry, metrics) = manager(&["sensors/room1/temp"]);
        manager.preregister();
        let recorder = RecordingSubscriber::default();

        tracing::subscriber::with_default(recorder.clone(), || {
            manager.on_message("sensors/room1/temp", b"21.5");
            manager.on_message("sensors/room1/temp", b"abc");
        });

        let warnings = recorder.warnings();
        assert_eq!(warnings.len(), 1);
        let warning = &warnings[0];
        assert_eq!(warning.fields["message"], "Invalid value");
        assert_eq!(warning.fields["topic"], "sensors/room1/temp");
        assert_eq!(warning.fields["payload"], "abc");
        assert_eq!(value(&registry, "sensors/room1/temp"), Some(21.5));
        assert_eq!(metrics.decode_errors.get(), 1);
    }
}
