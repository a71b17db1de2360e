//! Broker adapter backed by a Zenoh session.
//!
//! Zenoh re-establishes links and re-declares subscribers on its own. This
//! adapter watches whether any router or peer is reachable and turns the
//! transitions into [`BrokerEvents`] calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zenoh::Session;
use zenoh::pubsub::Subscriber;
use zenoh::sample::SampleKind;

use topic2prom_common::ZenohConfig;

use crate::broker::{Broker, BrokerError, BrokerEvents, MessageSink};
use crate::config::TimeoutConfig;

/// How often reachability is polled while waiting for the first link.
const LINK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Zenoh implementation of [`Broker`].
pub struct ZenohBroker {
    session: Session,
    sink: Arc<dyn MessageSink>,
    /// Live subscribers by topic; dropping one undeclares it.
    subscribers: Mutex<HashMap<String, Subscriber<()>>>,
    subscribe_timeout: Duration,
    link_check_interval: Duration,
    /// No remote endpoint configured: the local session is the whole network.
    standalone: bool,
}

impl ZenohBroker {
    /// Open the Zenoh session and wait for a router or peer to become
    /// reachable, giving up once the connect timeout has elapsed.
    ///
    /// A session without remote endpoints is ready as soon as it is open.
    pub async fn connect(
        config: &ZenohConfig,
        timeouts: &TimeoutConfig,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, BrokerError> {
        let timeout = timeouts.connect();
        let deadline = tokio::time::Instant::now() + timeout;

        let session = tokio::time::timeout_at(deadline, topic2prom_common::connect(config))
            .await
            .map_err(|_| BrokerError::ConnectTimeout { timeout })?
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let broker = Self {
            session,
            sink,
            subscribers: Mutex::new(HashMap::new()),
            subscribe_timeout: timeouts.subscribe(),
            link_check_interval: timeouts.link_check_interval(),
            standalone: config.mode != "client" && config.connect.is_empty(),
        };

        let reachable = tokio::time::timeout_at(deadline, async {
            while !broker.is_connected().await {
                tokio::time::sleep(LINK_POLL_INTERVAL).await;
            }
        })
        .await;

        if reachable.is_err() {
            warn!(
                connect = ?config.connect,
                "No router or peer reachable before the connect timeout"
            );
            if let Err(e) = broker.disconnect(timeout).await {
                debug!(error = %e, "Failed to close unreachable session");
            }
            return Err(BrokerError::ConnectTimeout { timeout });
        }

        Ok(broker)
    }

    /// Whether the session currently reaches the rest of the network.
    pub async fn is_connected(&self) -> bool {
        if self.standalone {
            return true;
        }

        let info = self.session.info();
        let routers = info.routers_zid().await.count();
        let peers = info.peers_zid().await.count();
        routers + peers > 0
    }

    /// The underlying Zenoh session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Number of topics with a declared subscriber.
    pub fn subscription_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Drive connection events until shutdown.
    ///
    /// Raises `on_connect` right away if the link is up, otherwise waits
    /// for it like after a loss. Afterwards the link is checked periodically.
    pub async fn run<E>(&self, events: &E, mut shutdown: watch::Receiver<bool>)
    where
        E: BrokerEvents<Self>,
    {
        let mut connected = self.is_connected().await;
        if connected {
            self.setup(events).await;
        } else {
            warn!("Broker link down before setup, waiting for it");
            events.on_reconnecting();
        }

        let mut interval = tokio::time::interval(self.link_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        debug!("Broker watcher stopping");
                        break;
                    }
                }

                _ = interval.tick() => {
                    let up = self.is_connected().await;
                    match (connected, up) {
                        (true, false) => {
                            events.on_connection_lost("no router or peer reachable");
                            events.on_reconnecting();
                        }
                        (false, true) => {
                            info!("Broker link re-established");
                            self.setup(events).await;
                        }
                        _ => {}
                    }
                    connected = up;
                }
            }
        }
    }

    async fn setup<E: BrokerEvents<Self>>(&self, events: &E) {
        let report = events.on_connect(self).await;
        if !report.is_complete() {
            warn!(
                failed = ?report.failed,
                "Some topics could not be subscribed"
            );
        }
    }

    /// Undeclare all subscribers and close the session within `timeout`.
    pub async fn disconnect(&self, timeout: Duration) -> Result<(), BrokerError> {
        let subscribers: Vec<_> = self.subscribers.lock().drain().collect();
        let count = subscribers.len();
        drop(subscribers);

        tokio::time::timeout(timeout, self.session.close())
            .await
            .map_err(|_| BrokerError::Disconnect(format!("timed out after {:?}", timeout)))?
            .map_err(|e| BrokerError::Disconnect(e.to_string()))?;

        info!(subscriptions = count, "Broker session closed");
        Ok(())
    }
}

impl Broker for ZenohBroker {
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        if self.subscribers.lock().contains_key(topic) {
            debug!(topic, "Already subscribed");
            return Ok(());
        }

        let sink = self.sink.clone();
        let declare = self
            .session
            .declare_subscriber(topic.to_string())
            .callback(move |sample| {
                if sample.kind() == SampleKind::Delete {
                    return;
                }
                let payload = sample.payload().to_bytes();
                sink.on_message(sample.key_expr().as_str(), &payload);
            });

        let subscriber = tokio::time::timeout(self.subscribe_timeout, declare)
            .await
            .map_err(|_| BrokerError::SubscribeTimeout {
                topic: topic.to_string(),
                timeout: self.subscribe_timeout,
            })?
            .map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_insert(subscriber);
        Ok(())
    }
}
