//! # Transport Contract
//!
//! One transport per worker: a single subscription feeding a serial frame
//! stream, plus publish. Transport failures are reported through the
//! status stream and never escalate into panics; workers log and carry on.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Errors from bus operations.
#[derive(Debug, Error, Clone)]
pub enum BusError {
    /// Connecting to the broker failed.
    #[error("bus connection failed: {0}")]
    ConnectionFailed(String),

    /// Subscribing a topic failed.
    #[error("subscribe failed for {topic}: {detail}")]
    SubscribeFailed {
        /// The topic filter.
        topic: String,
        /// Broker-side detail.
        detail: String,
    },

    /// Publishing a message failed.
    #[error("publish failed for {topic}: {detail}")]
    PublishFailed {
        /// The topic.
        topic: String,
        /// Broker-side detail.
        detail: String,
    },

    /// The transport only supports one subscription per connection.
    #[error("transport already subscribed")]
    AlreadySubscribed,

    /// The transport is closed.
    #[error("transport closed")]
    Closed,
}

/// A raw frame delivered from the bus.
#[derive(Debug, Clone)]
pub struct BusFrame {
    /// Topic the frame was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Connectivity change notice.
#[derive(Debug, Clone)]
pub struct TransportStatus {
    /// Whether the connection is up.
    pub connected: bool,
    /// Human-readable detail.
    pub detail: String,
}

/// A live subscription handle; frames arrive in receive order.
pub struct BusSubscription {
    topic: String,
    receiver: mpsc::Receiver<BusFrame>,
}

impl BusSubscription {
    /// Wrap a frame channel for a topic.
    pub(crate) fn new(topic: String, receiver: mpsc::Receiver<BusFrame>) -> Self {
        Self { topic, receiver }
    }

    /// The subscribed topic filter.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive the next frame; `None` when the transport closed.
    pub async fn recv(&mut self) -> Option<BusFrame> {
        self.receiver.recv().await
    }
}

/// The per-worker bus connection contract.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Subscribe the transport's single topic filter.
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError>;

    /// Publish a payload.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Watch connectivity changes.
    fn status(&self) -> broadcast::Receiver<TransportStatus>;

    /// Close the connection; pending subscriptions end their streams.
    async fn close(&self);
}

/// Mints one transport per worker.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Open a connection identified by `client_id` on the broker.
    async fn connect(&self, client_id: &str) -> Result<Arc<dyn BusTransport>, BusError>;
}
