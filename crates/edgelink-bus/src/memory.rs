//! # In-Memory Bus
//!
//! Single-process implementation of the transport contract, used by the
//! test suites and by embedded setups without a broker. Honors
//! `$share/<group>/` filters: subscribers in the same group receive a
//! round-robin partition of the topic's traffic, mirroring the broker's
//! shared-subscription semantics.

use crate::topics::TopicScheme;
use crate::transport::{
    BusConnector, BusError, BusFrame, BusSubscription, BusTransport, TransportStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Frames buffered per subscription.
const FRAME_CHANNEL_CAPACITY: usize = 1024;

struct Subscriber {
    sender: mpsc::Sender<BusFrame>,
}

#[derive(Default)]
struct ShareGroup {
    members: Vec<Subscriber>,
    next: AtomicUsize,
}

#[derive(Default)]
struct TopicEntry {
    /// Plain subscribers; each receives every frame.
    solo: Vec<Subscriber>,
    /// Shared-subscription groups; each group receives each frame once.
    groups: HashMap<String, ShareGroup>,
}

#[derive(Default)]
struct Hub {
    topics: HashMap<String, TopicEntry>,
}

/// A process-local bus shared by every transport cloned from it.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    hub: Arc<RwLock<Hub>>,
    status: Arc<RwLock<Option<broadcast::Sender<TransportStatus>>>>,
}

impl InMemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn status_sender(&self) -> broadcast::Sender<TransportStatus> {
        let mut slot = self.status.write().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert_with(|| broadcast::channel(16).0).clone()
    }

    fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        let hub = self.hub.read().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = hub.topics.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        for subscriber in &entry.solo {
            if subscriber
                .sender
                .try_send(BusFrame {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .is_ok()
            {
                delivered += 1;
            }
        }
        for group in entry.groups.values() {
            if group.members.is_empty() {
                continue;
            }
            let slot = group.next.fetch_add(1, Ordering::Relaxed) % group.members.len();
            if group.members[slot]
                .sender
                .try_send(BusFrame {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait]
impl BusTransport for InMemoryBus {
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError> {
        let (plain, group) = TopicScheme::split_share(topic);
        let (sender, receiver) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        {
            let mut hub = self.hub.write().unwrap_or_else(|e| e.into_inner());
            let entry = hub.topics.entry(plain.to_string()).or_default();
            match group {
                Some(group) => entry
                    .groups
                    .entry(group.to_string())
                    .or_default()
                    .members
                    .push(Subscriber { sender }),
                None => entry.solo.push(Subscriber { sender }),
            }
        }

        debug!(topic = %plain, group = ?group, "in-memory subscription created");
        Ok(BusSubscription::new(topic.to_string(), receiver))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.deliver(topic, &payload);
        Ok(())
    }

    fn status(&self) -> broadcast::Receiver<TransportStatus> {
        self.status_sender().subscribe()
    }

    async fn close(&self) {
        let mut hub = self.hub.write().unwrap_or_else(|e| e.into_inner());
        hub.topics.clear();
    }
}

#[async_trait]
impl BusConnector for InMemoryBus {
    async fn connect(&self, _client_id: &str) -> Result<Arc<dyn BusTransport>, BusError> {
        Ok(Arc::new(self.clone()))
    }
}
