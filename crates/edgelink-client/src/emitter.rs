//! # Event Emitter
//!
//! The subscription surface towards the embedding application: a firehose
//! of every [`ClientEvent`] plus per-name channels so callers can follow a
//! single event (or a plugin signature) without filtering themselves.
//! Dropping a subscription unsubscribes it.

use edgelink_types::ClientEvent;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Events buffered per subscriber before older ones are dropped.
const EVENT_CHANNEL_CAPACITY: usize = 512;

struct EmitterInner {
    all: broadcast::Sender<ClientEvent>,
    by_name: RwLock<HashMap<String, broadcast::Sender<ClientEvent>>>,
}

/// Fan-out hub for client events.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl EventEmitter {
    /// Create an emitter with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (all, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EmitterInner {
                all,
                by_name: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Emit an event to the firehose and to its name channel.
    pub fn emit(&self, event: ClientEvent) {
        let name = event.name().to_string();
        {
            let by_name = self
                .inner
                .by_name
                .read()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(sender) = by_name.get(&name) {
                let _ = sender.send(event.clone());
            }
        }
        let _ = self.inner.all.send(event);
    }

    /// Subscribe to one event name (or plugin signature).
    #[must_use]
    pub fn subscribe(&self, event_name: &str) -> EventSubscription {
        let mut by_name = self
            .inner
            .by_name
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let sender = by_name
            .entry(event_name.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0);
        EventSubscription {
            receiver: sender.subscribe(),
        }
    }

    /// Subscribe to every event.
    #[must_use]
    pub fn events(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.inner.all.subscribe(),
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// A live event subscription; dropped means unsubscribed.
pub struct EventSubscription {
    receiver: broadcast::Receiver<ClientEvent>,
}

impl EventSubscription {
    /// Receive the next event.
    ///
    /// `None` when the emitter is gone; a lagging subscriber skips to the
    /// oldest retained event.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event subscriber lagged");
                }
            }
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}
