//! # Shared-State Contract
//!
//! The one interface both backends implement. The client owns the
//! instance; workers never touch it. Broadcast methods fan changes out to
//! peer processes (a no-op for the in-process backend beyond the local
//! event echo); `deliver_*` methods route worker-matched notifications and
//! sticky payloads to their owning process inbox.

use crate::errors::StateError;
use crate::model::{HeartbeatSnapshot, StateEvent, SupervisorSnapshot};
use async_trait::async_trait;
use edgelink_types::{
    Address, AddressBook, FleetDelta, NotificationRecord, PayloadPath, ProcessedMessage,
};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// The shared-state manager contract.
#[async_trait]
pub trait SharedState: Send + Sync {
    /// Store a node's heartbeat snapshot.
    async fn node_info_update(
        &self,
        address: &Address,
        snapshot: HeartbeatSnapshot,
    ) -> Result<(), StateError>;

    /// Read a node's heartbeat snapshot; `None` on miss or expiry.
    async fn get_node_info(
        &self,
        address: &Address,
    ) -> Result<Option<HeartbeatSnapshot>, StateError>;

    /// Read the observed universe: `address → last-seen unix ms`.
    async fn get_universe(&self) -> Result<BTreeMap<String, u64>, StateError>;

    /// Record that an address was observed on the bus.
    ///
    /// Returns `false` when the universe lock could not be acquired
    /// (external backend); the entry is skipped and the caller logs.
    async fn mark_as_seen(&self, address: &Address, timestamp_ms: u64)
        -> Result<bool, StateError>;

    /// Store a supervisor's network snapshot and index the supervisor.
    ///
    /// Returns `false` when the supervisor-list lock could not be
    /// acquired.
    async fn update_network_snapshot(
        &self,
        supervisor: &Address,
        snapshot: SupervisorSnapshot,
    ) -> Result<bool, StateError>;

    /// Read a supervisor's last snapshot.
    async fn get_network_snapshot(
        &self,
        supervisor: &Address,
    ) -> Result<Option<SupervisorSnapshot>, StateError>;

    /// List known supervisors.
    async fn get_network_supervisors(&self) -> Result<Vec<Address>, StateError>;

    /// Broadcast a fleet delta to peer processes.
    async fn broadcast_update_fleet(&self, delta: FleetDelta) -> Result<(), StateError>;

    /// Broadcast an address-directory refresh to peer processes.
    async fn broadcast_update_addresses(&self, book: AddressBook) -> Result<(), StateError>;

    /// Broadcast a pending request's watches so any process's notification
    /// workers route matches to `inbox_id`.
    async fn broadcast_request_id(
        &self,
        session_id: &str,
        watches: &[PayloadPath],
        inbox_id: &str,
    ) -> Result<(), StateError>;

    /// Withdraw a pending request's watches.
    async fn broadcast_ignore_request_id(
        &self,
        session_id: &str,
        watches: &[PayloadPath],
        inbox_id: &str,
    ) -> Result<(), StateError>;

    /// Broadcast a sticky session so payload workers anywhere pin matching
    /// payloads to `inbox_id`. No-op in the in-process backend.
    async fn broadcast_payload_sticky_session(
        &self,
        sticky_id: &str,
        inbox_id: &str,
    ) -> Result<(), StateError>;

    /// Route a watched notification to its owning inbox.
    async fn deliver_request_response(
        &self,
        inbox_id: &str,
        record: NotificationRecord,
    ) -> Result<(), StateError>;

    /// Route a sticky payload to its owning inbox.
    async fn deliver_sticky_payload(
        &self,
        inbox_id: &str,
        message: ProcessedMessage,
    ) -> Result<(), StateError>;

    /// Subscribe to state events.
    fn events(&self) -> broadcast::Receiver<StateEvent>;

    /// This process's inbox id.
    fn inbox_id(&self) -> &str;

    /// Whether peer processes can observe this backend's broadcasts.
    fn is_distributed(&self) -> bool;

    /// Release backend handles; subsequent calls fail with
    /// [`StateError::Closed`].
    async fn close(&self) -> Result<(), StateError>;
}
