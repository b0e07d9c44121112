//! # External-Cache Backend
//!
//! State in a Redis cache with the TTLs of the protocol, cross-process
//! broadcast over pub/sub channels, and a per-process inbox channel for
//! request-response routing.
//!
//! ## Locking
//!
//! Read-modify-write on shared keys (universe, supervisor list, supervisor
//! snapshot) acquires `<key>:lock` via `SET NX PX 100`, retrying up to 10
//! times at 100 ms. The lock is deleted on every exit path. A write that
//! cannot take its lock returns `Ok(false)` and logs; it never blocks the
//! caller further.

use crate::errors::StateError;
use crate::manager::SharedState;
use crate::model::{
    heartbeat_key, snapshot_key, HeartbeatSnapshot, InboxMessage, PeerBroadcast, StateEvent,
    SupervisorSnapshot, ADDRESS_UPDATES_CHANNEL, FLEET_UPDATES_CHANNEL, HEARTBEAT_TTL_SECS,
    SUPERVISORS_KEY, SUPERVISOR_TTL_SECS, UNIVERSE_KEY, UNIVERSE_TTL_SECS,
};
use async_trait::async_trait;
use edgelink_types::config::{random_id, random_inbox_id};
use edgelink_types::{
    Address, AddressBook, ExternalCacheConfig, FleetDelta, NotificationRecord, PayloadPath,
    ProcessedMessage,
};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

/// Lock TTL.
const LOCK_EXPIRATION_MS: u64 = 100;
/// Lock acquisition attempts.
const MAX_RETRIES: u32 = 10;
/// Delay between lock attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Events buffered per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Multi-process state manager over a Redis cache.
pub struct RedisState {
    conn: ConnectionManager,
    events: broadcast::Sender<StateEvent>,
    inbox_id: String,
    updates_channel: String,
    listener: JoinHandle<()>,
    closed: AtomicBool,
}

impl RedisState {
    /// Connect to the cache and start the pub/sub listener.
    ///
    /// Subscribes the two well-known channels, the client-scoped updates
    /// channel and this process's inbox channel.
    pub async fn connect(
        config: &ExternalCacheConfig,
        updates_channel: &str,
    ) -> Result<Self, StateError> {
        let url = match &config.password {
            Some(password) => format!("redis://:{password}@{}:{}/", config.host, config.port),
            None => format!("redis://{}:{}/", config.host, config.port),
        };
        let client =
            redis::Client::open(url).map_err(|e| StateError::ConnectionFailed(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StateError::ConnectionFailed(e.to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inbox_id = random_inbox_id();

        let listener = Self::spawn_listener(
            client,
            events.clone(),
            inbox_id.clone(),
            updates_channel.to_string(),
        )
        .await?;

        Ok(Self {
            conn,
            events,
            inbox_id,
            updates_channel: updates_channel.to_string(),
            listener,
            closed: AtomicBool::new(false),
        })
    }

    async fn spawn_listener(
        client: redis::Client,
        events: broadcast::Sender<StateEvent>,
        inbox_id: String,
        updates_channel: String,
    ) -> Result<JoinHandle<()>, StateError> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| StateError::ConnectionFailed(e.to_string()))?;
        pubsub
            .subscribe(&[
                FLEET_UPDATES_CHANNEL,
                ADDRESS_UPDATES_CHANNEL,
                updates_channel.as_str(),
                inbox_id.as_str(),
            ])
            .await
            .map_err(|e| StateError::ConnectionFailed(e.to_string()))?;

        Ok(tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let Ok(payload) = msg.get_payload::<String>() else {
                    warn!(channel = %channel, "non-text pub/sub payload dropped");
                    continue;
                };
                if channel == inbox_id {
                    Self::handle_inbox(&events, &inbox_id, &payload);
                } else {
                    Self::handle_broadcast(&events, &inbox_id, &channel, &payload);
                }
            }
            debug!("pub/sub listener ended");
        }))
    }

    fn handle_inbox(events: &broadcast::Sender<StateEvent>, inbox_id: &str, payload: &str) {
        match serde_json::from_str::<InboxMessage>(payload) {
            Ok(InboxMessage::RequestResponse { record }) => {
                let _ = events.send(StateEvent::RequestResponseNotification {
                    inbox_id: inbox_id.to_string(),
                    record,
                });
            }
            Ok(InboxMessage::StickyPayload { message }) => {
                let _ = events.send(StateEvent::StickyPayloadReceived {
                    inbox_id: inbox_id.to_string(),
                    message: Box::new(message),
                });
            }
            Err(e) => warn!(error = %e, "corrupt inbox message dropped"),
        }
    }

    fn handle_broadcast(
        events: &broadcast::Sender<StateEvent>,
        own_inbox: &str,
        channel: &str,
        payload: &str,
    ) {
        let broadcast = match serde_json::from_str::<PeerBroadcast>(payload) {
            Ok(b) => b,
            Err(e) => {
                warn!(channel = %channel, error = %e, "corrupt broadcast dropped");
                return;
            }
        };
        if broadcast.origin() == own_inbox {
            // Our own publication echoed back.
            return;
        }
        let event = match broadcast {
            PeerBroadcast::FleetUpdate { delta, .. } => StateEvent::FleetUpdate(delta),
            PeerBroadcast::AddressUpdate { book, .. } => StateEvent::AddressUpdate(book),
            PeerBroadcast::RequestWatch {
                session_id,
                inbox_id,
                paths,
                watch,
                ..
            } => StateEvent::RequestWatch {
                session_id,
                inbox_id,
                paths,
                watch,
            },
            PeerBroadcast::StickySession {
                sticky_id,
                inbox_id,
                ..
            } => StateEvent::StickySession {
                sticky_id,
                inbox_id,
            },
        };
        let _ = events.send(event);
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(StateError::Closed);
        }
        Ok(())
    }

    /// Acquire `<key>:lock`; `None` after all retries fail.
    async fn acquire_lock(&self, key: &str) -> Option<String> {
        let lock_key = format!("{key}:lock");
        let token = random_id(8);
        let mut conn = self.conn.clone();

        for attempt in 0..MAX_RETRIES {
            let outcome: Result<Option<String>, redis::RedisError> = redis::cmd("SET")
                .arg(&lock_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(LOCK_EXPIRATION_MS)
                .query_async(&mut conn)
                .await;
            match outcome {
                Ok(Some(_)) => return Some(lock_key),
                Ok(None) => {
                    debug!(key = %lock_key, attempt, "lock busy, retrying");
                }
                Err(e) => {
                    error!(key = %lock_key, error = %e, "lock acquisition error");
                    return None;
                }
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
        None
    }

    async fn release_lock(&self, lock_key: &str) {
        let mut conn = self.conn.clone();
        let released: Result<(), redis::RedisError> = conn.del(lock_key).await;
        if let Err(e) = released {
            warn!(key = %lock_key, error = %e, "lock release failed; TTL will reap it");
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            None => Ok(None),
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| StateError::CorruptValue {
                    key: key.to_string(),
                    detail: e.to_string(),
                }),
        }
    }

    async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), StateError> {
        let text =
            serde_json::to_string(value).map_err(|e| StateError::EncodingFailed(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, text, ttl_secs).await?;
        Ok(())
    }

    async fn publish_json<T: Serialize>(&self, channel: &str, value: &T) -> Result<(), StateError> {
        let text =
            serde_json::to_string(value).map_err(|e| StateError::EncodingFailed(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, text).await?;
        Ok(())
    }
}

#[async_trait]
impl SharedState for RedisState {
    async fn node_info_update(
        &self,
        address: &Address,
        snapshot: HeartbeatSnapshot,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        // Single-writer per address: last write wins, no lock needed.
        self.set_json(&heartbeat_key(address), &snapshot, HEARTBEAT_TTL_SECS)
            .await
    }

    async fn get_node_info(
        &self,
        address: &Address,
    ) -> Result<Option<HeartbeatSnapshot>, StateError> {
        self.ensure_open()?;
        self.get_json(&heartbeat_key(address)).await
    }

    async fn get_universe(&self) -> Result<BTreeMap<String, u64>, StateError> {
        self.ensure_open()?;
        Ok(self.get_json(UNIVERSE_KEY).await?.unwrap_or_default())
    }

    async fn mark_as_seen(
        &self,
        address: &Address,
        timestamp_ms: u64,
    ) -> Result<bool, StateError> {
        self.ensure_open()?;
        let Some(lock) = self.acquire_lock(UNIVERSE_KEY).await else {
            error!(key = UNIVERSE_KEY, "universe lock unavailable, write skipped");
            return Ok(false);
        };

        let outcome = async {
            let mut universe: BTreeMap<String, u64> =
                self.get_json(UNIVERSE_KEY).await?.unwrap_or_default();
            universe.insert(address.as_str().to_string(), timestamp_ms);
            self.set_json(UNIVERSE_KEY, &universe, UNIVERSE_TTL_SECS).await
        }
        .await;

        self.release_lock(&lock).await;
        outcome.map(|()| true)
    }

    async fn update_network_snapshot(
        &self,
        supervisor: &Address,
        snapshot: SupervisorSnapshot,
    ) -> Result<bool, StateError> {
        self.ensure_open()?;
        let Some(lock) = self.acquire_lock(SUPERVISORS_KEY).await else {
            error!(key = SUPERVISORS_KEY, "supervisor lock unavailable, write skipped");
            return Ok(false);
        };

        let outcome = async {
            let mut supervisors: Vec<Address> =
                self.get_json(SUPERVISORS_KEY).await?.unwrap_or_default();
            if !supervisors.contains(supervisor) {
                supervisors.push(supervisor.clone());
            }
            self.set_json(SUPERVISORS_KEY, &supervisors, SUPERVISOR_TTL_SECS)
                .await?;
            self.set_json(&snapshot_key(supervisor), &snapshot, SUPERVISOR_TTL_SECS)
                .await
        }
        .await;

        self.release_lock(&lock).await;

        match outcome {
            Ok(()) => {
                let _ = self.events.send(StateEvent::SupervisorPayload {
                    supervisor: supervisor.clone(),
                    snapshot: Box::new(snapshot),
                });
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_network_snapshot(
        &self,
        supervisor: &Address,
    ) -> Result<Option<SupervisorSnapshot>, StateError> {
        self.ensure_open()?;
        self.get_json(&snapshot_key(supervisor)).await
    }

    async fn get_network_supervisors(&self) -> Result<Vec<Address>, StateError> {
        self.ensure_open()?;
        Ok(self.get_json(SUPERVISORS_KEY).await?.unwrap_or_default())
    }

    async fn broadcast_update_fleet(&self, delta: FleetDelta) -> Result<(), StateError> {
        self.ensure_open()?;
        self.publish_json(
            FLEET_UPDATES_CHANNEL,
            &PeerBroadcast::FleetUpdate {
                origin: self.inbox_id.clone(),
                delta,
            },
        )
        .await
    }

    async fn broadcast_update_addresses(&self, book: AddressBook) -> Result<(), StateError> {
        self.ensure_open()?;
        self.publish_json(
            ADDRESS_UPDATES_CHANNEL,
            &PeerBroadcast::AddressUpdate {
                origin: self.inbox_id.clone(),
                book,
            },
        )
        .await
    }

    async fn broadcast_request_id(
        &self,
        session_id: &str,
        watches: &[PayloadPath],
        inbox_id: &str,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        self.publish_json(
            &self.updates_channel,
            &PeerBroadcast::RequestWatch {
                origin: self.inbox_id.clone(),
                session_id: session_id.to_string(),
                inbox_id: inbox_id.to_string(),
                paths: watches.to_vec(),
                watch: true,
            },
        )
        .await
    }

    async fn broadcast_ignore_request_id(
        &self,
        session_id: &str,
        watches: &[PayloadPath],
        inbox_id: &str,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        self.publish_json(
            &self.updates_channel,
            &PeerBroadcast::RequestWatch {
                origin: self.inbox_id.clone(),
                session_id: session_id.to_string(),
                inbox_id: inbox_id.to_string(),
                paths: watches.to_vec(),
                watch: false,
            },
        )
        .await
    }

    async fn broadcast_payload_sticky_session(
        &self,
        sticky_id: &str,
        inbox_id: &str,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        self.publish_json(
            &self.updates_channel,
            &PeerBroadcast::StickySession {
                origin: self.inbox_id.clone(),
                sticky_id: sticky_id.to_string(),
                inbox_id: inbox_id.to_string(),
            },
        )
        .await
    }

    async fn deliver_request_response(
        &self,
        inbox_id: &str,
        record: NotificationRecord,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        self.publish_json(inbox_id, &InboxMessage::RequestResponse { record })
            .await
    }

    async fn deliver_sticky_payload(
        &self,
        inbox_id: &str,
        message: ProcessedMessage,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        self.publish_json(inbox_id, &InboxMessage::StickyPayload { message })
            .await
    }

    fn events(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    fn inbox_id(&self) -> &str {
        &self.inbox_id
    }

    fn is_distributed(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<(), StateError> {
        self.closed.store(true, Ordering::Relaxed);
        self.listener.abort();
        Ok(())
    }
}

impl Drop for RedisState {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
