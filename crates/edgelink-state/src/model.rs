//! # State Model
//!
//! Snapshot types held by the state manager, the events it emits towards
//! the client, and the wire forms of the cross-process broadcasts.

use edgelink_types::{
    Address, AddressBook, FleetDelta, NotificationRecord, PayloadPath, ProcessedMessage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// CACHE KEYS AND TTLS (external backend)
// =============================================================================

/// Heartbeat snapshot TTL.
pub const HEARTBEAT_TTL_SECS: u64 = 180;
/// Observed-universe TTL.
pub const UNIVERSE_TTL_SECS: u64 = 3_600;
/// Supervisor snapshot and supervisor list TTL.
pub const SUPERVISOR_TTL_SECS: u64 = 7 * 24 * 3_600;

/// Key of the observed universe.
pub const UNIVERSE_KEY: &str = "known:universe";
/// Key of the supervisor list.
pub const SUPERVISORS_KEY: &str = "network:supervisors";

/// Key of a node's heartbeat snapshot.
#[must_use]
pub fn heartbeat_key(address: &Address) -> String {
    format!("state:{address}:heartbeat")
}

/// Key of a supervisor's network snapshot.
#[must_use]
pub fn snapshot_key(supervisor: &Address) -> String {
    format!("network:snapshot:{supervisor}")
}

/// Well-known channel for fleet deltas.
pub const FLEET_UPDATES_CHANNEL: &str = "fleet-updates";
/// Well-known channel for address-directory refreshes.
pub const ADDRESS_UPDATES_CHANNEL: &str = "address-updates";

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Node-reported clock information from a heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeTime {
    /// Local date string as reported by the node.
    pub date: Option<String>,
    /// UTC offset label as reported by the node.
    pub utc: Option<String>,
}

/// The last heartbeat of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSnapshot {
    /// Receipt time, unix ms.
    pub last_update_ms: u64,
    /// Node-reported clock.
    pub node_time: NodeTime,
    /// Decoded heartbeat data.
    pub data: Value,
}

/// A supervisor's network view plus its own status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSnapshot {
    /// Supervisor node name, when known.
    pub name: Option<String>,
    /// Supervisor address.
    pub address: Address,
    /// Supervisor status value.
    pub status: Value,
    /// Snapshot time, unix ms.
    pub timestamp: u64,
    /// The full network-view payload.
    pub payload: Value,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Events the state manager emits towards the client.
///
/// With the external backend these include peer-process broadcasts; the
/// in-process backend only ever emits local echoes.
#[derive(Debug, Clone)]
pub enum StateEvent {
    /// A fleet delta was broadcast.
    FleetUpdate(FleetDelta),
    /// An address-directory refresh was broadcast.
    AddressUpdate(AddressBook),
    /// A peer process opened or closed request watches.
    RequestWatch {
        /// The pending request id.
        session_id: String,
        /// Inbox notifications route to.
        inbox_id: String,
        /// Watched paths.
        paths: Vec<PayloadPath>,
        /// `true` to watch, `false` to ignore.
        watch: bool,
    },
    /// A peer process registered a sticky session.
    StickySession {
        /// The sticky command id.
        sticky_id: String,
        /// Inbox payloads pin to.
        inbox_id: String,
    },
    /// A watched notification arrived for this process's inbox.
    RequestResponseNotification {
        /// Target inbox.
        inbox_id: String,
        /// The matching notification.
        record: NotificationRecord,
    },
    /// A sticky payload arrived for this process's inbox.
    StickyPayloadReceived {
        /// Target inbox.
        inbox_id: String,
        /// The pinned payload.
        message: Box<ProcessedMessage>,
    },
    /// A supervisor snapshot was stored.
    SupervisorPayload {
        /// The supervisor.
        supervisor: Address,
        /// The stored snapshot.
        snapshot: Box<SupervisorSnapshot>,
    },
}

// =============================================================================
// CROSS-PROCESS WIRE FORMS
// =============================================================================

/// Broadcast messages exchanged between peer processes over the shared
/// channels. `origin` carries the sender's inbox id so processes can
/// ignore their own publications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerBroadcast {
    /// Fleet delta on `fleet-updates`.
    FleetUpdate {
        /// Sender's inbox id.
        origin: String,
        /// The delta.
        delta: FleetDelta,
    },
    /// Directory refresh on `address-updates`.
    AddressUpdate {
        /// Sender's inbox id.
        origin: String,
        /// The full directory.
        book: AddressBook,
    },
    /// Watch registration on `updates-<initiator>`.
    RequestWatch {
        /// Sender's inbox id.
        origin: String,
        /// The pending request id.
        session_id: String,
        /// Inbox notifications route to.
        inbox_id: String,
        /// Watched paths.
        paths: Vec<PayloadPath>,
        /// `true` to watch, `false` to ignore.
        watch: bool,
    },
    /// Sticky-session registration on `updates-<initiator>`.
    StickySession {
        /// Sender's inbox id.
        origin: String,
        /// The sticky command id.
        sticky_id: String,
        /// Inbox payloads pin to.
        inbox_id: String,
    },
}

impl PeerBroadcast {
    /// The originating process's inbox id.
    #[must_use]
    pub fn origin(&self) -> &str {
        match self {
            PeerBroadcast::FleetUpdate { origin, .. }
            | PeerBroadcast::AddressUpdate { origin, .. }
            | PeerBroadcast::RequestWatch { origin, .. }
            | PeerBroadcast::StickySession { origin, .. } => origin,
        }
    }
}

/// Messages published to a process's inbox channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboxMessage {
    /// A watched notification.
    RequestResponse {
        /// The matching notification.
        record: NotificationRecord,
    },
    /// A sticky payload.
    StickyPayload {
        /// The pinned payload.
        message: ProcessedMessage,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        let mut b = [9u8; 33];
        b[0] = 0x02;
        Address::from_compressed_bytes(&b)
    }

    #[test]
    fn test_key_composition() {
        let a = addr();
        assert_eq!(heartbeat_key(&a), format!("state:{a}:heartbeat"));
        assert_eq!(snapshot_key(&a), format!("network:snapshot:{a}"));
    }

    #[test]
    fn test_peer_broadcast_wire_round_trip() {
        let msg = PeerBroadcast::FleetUpdate {
            origin: "abc123".to_string(),
            delta: FleetDelta::add(addr()),
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("FLEET_UPDATE"));

        let decoded: PeerBroadcast = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.origin(), "abc123");
    }

    #[test]
    fn test_inbox_message_tagging() {
        let record = NotificationRecord::from_body(
            PayloadPath::pipeline("n", "p"),
            &serde_json::json!({ "NOTIFICATION_CODE": "PLUGIN_OK" }),
        );
        let msg = InboxMessage::RequestResponse { record };
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("REQUEST_RESPONSE"));
    }
}
