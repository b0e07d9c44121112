//! # In-Process Backend
//!
//! All state in local maps behind an async `RwLock`. Broadcasts have no
//! peers to reach; they surface only as local events so observers (and
//! tests) see the same stream the external backend produces. Inbox
//! delivery short-circuits straight onto the event channel.

use crate::errors::StateError;
use crate::manager::SharedState;
use crate::model::{HeartbeatSnapshot, StateEvent, SupervisorSnapshot};
use async_trait::async_trait;
use edgelink_types::config::random_inbox_id;
use edgelink_types::{
    Address, AddressBook, FleetDelta, NotificationRecord, PayloadPath, ProcessedMessage,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Events buffered per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Maps {
    heartbeats: BTreeMap<String, HeartbeatSnapshot>,
    universe: BTreeMap<String, u64>,
    supervisors: BTreeMap<String, SupervisorSnapshot>,
}

/// Single-process state manager.
pub struct InProcessState {
    maps: RwLock<Maps>,
    events: broadcast::Sender<StateEvent>,
    inbox_id: String,
    closed: AtomicBool,
}

impl InProcessState {
    /// Create an empty in-process state manager.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            maps: RwLock::new(Maps::default()),
            events,
            inbox_id: random_inbox_id(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(StateError::Closed);
        }
        Ok(())
    }

    fn emit(&self, event: StateEvent) {
        // No subscribers is fine; events are best-effort.
        let _ = self.events.send(event);
    }
}

impl Default for InProcessState {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedState for InProcessState {
    async fn node_info_update(
        &self,
        address: &Address,
        snapshot: HeartbeatSnapshot,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        let mut maps = self.maps.write().await;
        maps.heartbeats
            .insert(address.as_str().to_string(), snapshot);
        Ok(())
    }

    async fn get_node_info(
        &self,
        address: &Address,
    ) -> Result<Option<HeartbeatSnapshot>, StateError> {
        self.ensure_open()?;
        let maps = self.maps.read().await;
        Ok(maps.heartbeats.get(address.as_str()).cloned())
    }

    async fn get_universe(&self) -> Result<BTreeMap<String, u64>, StateError> {
        self.ensure_open()?;
        let maps = self.maps.read().await;
        Ok(maps.universe.clone())
    }

    async fn mark_as_seen(
        &self,
        address: &Address,
        timestamp_ms: u64,
    ) -> Result<bool, StateError> {
        self.ensure_open()?;
        let mut maps = self.maps.write().await;
        maps.universe
            .insert(address.as_str().to_string(), timestamp_ms);
        Ok(true)
    }

    async fn update_network_snapshot(
        &self,
        supervisor: &Address,
        snapshot: SupervisorSnapshot,
    ) -> Result<bool, StateError> {
        self.ensure_open()?;
        {
            let mut maps = self.maps.write().await;
            maps.supervisors
                .insert(supervisor.as_str().to_string(), snapshot.clone());
        }
        self.emit(StateEvent::SupervisorPayload {
            supervisor: supervisor.clone(),
            snapshot: Box::new(snapshot),
        });
        Ok(true)
    }

    async fn get_network_snapshot(
        &self,
        supervisor: &Address,
    ) -> Result<Option<SupervisorSnapshot>, StateError> {
        self.ensure_open()?;
        let maps = self.maps.read().await;
        Ok(maps.supervisors.get(supervisor.as_str()).cloned())
    }

    async fn get_network_supervisors(&self) -> Result<Vec<Address>, StateError> {
        self.ensure_open()?;
        let maps = self.maps.read().await;
        Ok(maps
            .supervisors
            .values()
            .map(|s| s.address.clone())
            .collect())
    }

    async fn broadcast_update_fleet(&self, delta: FleetDelta) -> Result<(), StateError> {
        self.ensure_open()?;
        debug!(address = %delta.address, action = delta.action, "fleet update (local only)");
        self.emit(StateEvent::FleetUpdate(delta));
        Ok(())
    }

    async fn broadcast_update_addresses(&self, book: AddressBook) -> Result<(), StateError> {
        self.ensure_open()?;
        self.emit(StateEvent::AddressUpdate(book));
        Ok(())
    }

    async fn broadcast_request_id(
        &self,
        session_id: &str,
        watches: &[PayloadPath],
        inbox_id: &str,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        self.emit(StateEvent::RequestWatch {
            session_id: session_id.to_string(),
            inbox_id: inbox_id.to_string(),
            paths: watches.to_vec(),
            watch: true,
        });
        Ok(())
    }

    async fn broadcast_ignore_request_id(
        &self,
        session_id: &str,
        watches: &[PayloadPath],
        inbox_id: &str,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        self.emit(StateEvent::RequestWatch {
            session_id: session_id.to_string(),
            inbox_id: inbox_id.to_string(),
            paths: watches.to_vec(),
            watch: false,
        });
        Ok(())
    }

    async fn broadcast_payload_sticky_session(
        &self,
        _sticky_id: &str,
        _inbox_id: &str,
    ) -> Result<(), StateError> {
        // Single process: the client already commands its own payload
        // workers; there is nobody else to tell.
        self.ensure_open()
    }

    async fn deliver_request_response(
        &self,
        inbox_id: &str,
        record: NotificationRecord,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        self.emit(StateEvent::RequestResponseNotification {
            inbox_id: inbox_id.to_string(),
            record,
        });
        Ok(())
    }

    async fn deliver_sticky_payload(
        &self,
        inbox_id: &str,
        message: ProcessedMessage,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        self.emit(StateEvent::StickyPayloadReceived {
            inbox_id: inbox_id.to_string(),
            message: Box::new(message),
        });
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    fn inbox_id(&self) -> &str {
        &self.inbox_id
    }

    fn is_distributed(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<(), StateError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addr(tag: u8) -> Address {
        let mut b = [4u8; 33];
        b[0] = 0x02;
        b[32] = tag;
        Address::from_compressed_bytes(&b)
    }

    fn snapshot(ts: u64) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            last_update_ms: ts,
            node_time: Default::default(),
            data: json!({ "CPU": "ok" }),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_round_trip() {
        let state = InProcessState::new();
        let a = addr(1);

        state.node_info_update(&a, snapshot(5)).await.unwrap();
        let got = state.get_node_info(&a).await.unwrap().unwrap();
        assert_eq!(got.last_update_ms, 5);

        assert!(state.get_node_info(&addr(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_universe_tracks_all_observations() {
        let state = InProcessState::new();
        assert!(state.mark_as_seen(&addr(1), 10).await.unwrap());
        assert!(state.mark_as_seen(&addr(2), 20).await.unwrap());
        assert!(state.mark_as_seen(&addr(1), 30).await.unwrap());

        let universe = state.get_universe().await.unwrap();
        assert_eq!(universe.len(), 2);
        assert_eq!(universe.get(addr(1).as_str()), Some(&30));
    }

    #[tokio::test]
    async fn test_supervisor_snapshot_emits_event() {
        let state = InProcessState::new();
        let mut events = state.events();
        let sup = addr(7);

        let stored = state
            .update_network_snapshot(
                &sup,
                SupervisorSnapshot {
                    name: Some("sup-1".to_string()),
                    address: sup.clone(),
                    status: json!("ONLINE"),
                    timestamp: 1,
                    payload: json!({}),
                },
            )
            .await
            .unwrap();
        assert!(stored);

        let event = events.recv().await.unwrap();
        assert!(matches!(event, StateEvent::SupervisorPayload { .. }));

        let supervisors = state.get_network_supervisors().await.unwrap();
        assert_eq!(supervisors, vec![sup]);
    }

    #[tokio::test]
    async fn test_inbox_delivery_is_local() {
        let state = InProcessState::new();
        let mut events = state.events();

        let record = NotificationRecord::from_body(
            PayloadPath::pipeline("n", "p"),
            &json!({ "NOTIFICATION_CODE": "PLUGIN_OK" }),
        );
        state
            .deliver_request_response(state.inbox_id(), record)
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            StateEvent::RequestResponseNotification { inbox_id, record } => {
                assert_eq!(inbox_id, state.inbox_id());
                assert_eq!(record.code.as_deref(), Some("PLUGIN_OK"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_backend_refuses_calls() {
        let state = InProcessState::new();
        state.close().await.unwrap();
        assert!(state.get_universe().await.is_err());
    }
}
