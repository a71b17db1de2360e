//! Narrow interface between the subscription manager and the message broker.
//!
//! The broker adapter owns the transport and raises connection events; the
//! subscription manager reacts to them. Both sides only meet through the
//! traits below, which keeps either one replaceable in tests.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by a broker adapter.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Timed out after {timeout:?} connecting to the broker")]
    ConnectTimeout { timeout: Duration },

    #[error("Failed to connect to the broker: {0}")]
    Connect(String),

    #[error("Timed out after {timeout:?} subscribing to {topic}")]
    SubscribeTimeout { topic: String, timeout: Duration },

    #[error("Failed to subscribe to {topic}: {message}")]
    Subscribe { topic: String, message: String },

    #[error("Failed to close the broker session: {0}")]
    Disconnect(String),
}

/// Receiver of inbound messages.
///
/// Called from the broker's own delivery threads, possibly concurrently.
pub trait MessageSink: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Subscription primitive offered by a broker adapter.
///
/// Subscribing twice to the same topic must be harmless: the adapter either
/// deduplicates or the transport guarantees idempotent resubscription.
pub trait Broker: Send + Sync {
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// Outcome of one subscription setup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    /// Topics subscribed successfully.
    pub subscribed: Vec<String>,
    /// Topics whose subscription failed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl SetupReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Connection lifecycle events raised by a broker adapter.
pub trait BrokerEvents<B: Broker>: MessageSink {
    /// A connection attempt is about to start.
    fn on_connecting(&self) {}

    /// The connection is (re-)established; subscriptions must be set up.
    fn on_connect(&self, broker: &B) -> impl Future<Output = SetupReport> + Send;

    /// The connection dropped after having been established.
    fn on_connection_lost(&self, reason: &str);

    /// The transport started re-establishing the connection.
    fn on_reconnecting(&self) {}
}
