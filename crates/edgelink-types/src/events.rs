//! # Client Events
//!
//! Events the client emits to the embedding application. Payloads are
//! tagged variants; names stay string constants because deployed
//! supervisors and tooling match on them verbatim.
//!
//! Payload messages additionally surface under their plugin signature as
//! the event name, so applications can subscribe per plugin.

use crate::address::Address;
use crate::commands::NotificationRecord;
use crate::ipc::{DownNode, ProcessedMessage};
use serde_json::Value;

/// Event name constants, kept verbatim for wire compatibility.
pub mod event_names {
    /// All workers acknowledged start.
    pub const CLIENT_BOOTED: &str = "CLIENT_BOOTED";
    /// The client's own blockchain address.
    pub const BC_ADDRESS: &str = "BC_ADDRESS";
    /// A stream subscription was established.
    pub const CLIENT_SYS_TOPIC_SUBSCRIBE: &str = "CLIENT_SYS_TOPIC_SUBSCRIBE";
    /// A node joined the tracked fleet.
    pub const ENGINE_REGISTERED: &str = "ENGINE_REGISTERED";
    /// A node left the tracked fleet.
    pub const ENGINE_DEREGISTERED: &str = "ENGINE_DEREGISTERED";
    /// A fleet node recovered from a supervisor alert.
    pub const ENGINE_ONLINE: &str = "ENGINE_ONLINE";
    /// A fleet node entered a supervisor alert.
    pub const ENGINE_OFFLINE: &str = "ENGINE_OFFLINE";
    /// Heartbeat delivered, keyed by engine name.
    pub const RECEIVED_HEARTBEAT_FROM_ENGINE: &str = "RECEIVED_HEARTBEAT_FROM_ENGINE";
    /// Heartbeat delivered, keyed by address.
    pub const RECEIVED_HEARTBEAT_FROM_ADDRESS: &str = "RECEIVED_HEARTBEAT_FROM_ADDRESS";
    /// A supervisor network-view payload arrived.
    pub const SUPERVISOR_PAYLOAD: &str = "SUPERVISOR_PAYLOAD";
    /// A supervisor alerted nodes as down.
    pub const NETWORK_NODE_DOWN: &str = "NETWORK_NODE_DOWN";
    /// A plain notification arrived.
    pub const NOTIFICATION_RECEIVED: &str = "NOTIFICATION_RECEIVED";
    /// Bus connectivity changed.
    pub const CONNECTION_STATUS: &str = "CONNECTION_STATUS";
    /// A programmer error surfaced from a handler.
    pub const UNHANDLED_EXCEPTION: &str = "UNHANDLED_EXCEPTION";
}

/// An event emitted to the embedding application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Boot finished; all workers run.
    ClientBooted {
        /// The client's own address.
        address: Address,
    },
    /// The client's blockchain address, emitted right after boot.
    BlockchainAddress {
        /// The client's own address.
        address: Address,
    },
    /// A worker subscribed its stream topic.
    TopicSubscribed {
        /// The composed topic.
        topic: String,
    },
    /// Fleet registration applied.
    EngineRegistered {
        /// The registered node.
        address: Address,
    },
    /// Fleet deregistration applied.
    EngineDeregistered {
        /// The removed node.
        address: Address,
    },
    /// A fleet node recovered from a supervisor alert.
    EngineOnline {
        /// Human node name from the supervisor view.
        node: String,
        /// Resolved address, when the directory knows it.
        address: Option<Address>,
    },
    /// A fleet node was alerted as down.
    EngineOffline {
        /// Human node name from the supervisor view.
        node: String,
        /// Resolved address, when the directory knows it.
        address: Option<Address>,
        /// Last-seen stamp from the alert, when present.
        last_seen: Option<String>,
    },
    /// A heartbeat passed the fleet filter (engine-name keyed form).
    HeartbeatFromEngine {
        /// Node name, when the directory knows it.
        node: Option<String>,
        /// The decoded heartbeat.
        message: Box<ProcessedMessage>,
    },
    /// A heartbeat passed the fleet filter (address keyed form).
    HeartbeatFromAddress {
        /// Sender address.
        address: Address,
        /// The decoded heartbeat.
        message: Box<ProcessedMessage>,
    },
    /// A notification passed the fleet filter.
    Notification {
        /// The decoded notification.
        record: NotificationRecord,
    },
    /// A payload passed the fleet filter; surfaces under its plugin
    /// signature.
    Payload {
        /// Plugin signature (the event name).
        signature: String,
        /// The decoded payload.
        message: Box<ProcessedMessage>,
    },
    /// A supervisor network-view payload arrived.
    SupervisorPayload {
        /// Supervisor address.
        supervisor: Address,
        /// The decoded payload.
        message: Box<ProcessedMessage>,
    },
    /// Nodes alerted as down (diagnostic mirror of the offline events).
    NetworkNodeDown {
        /// Supervisor address that raised the alert.
        supervisor: Address,
        /// The alerted nodes.
        nodes: Vec<DownNode>,
    },
    /// Bus connectivity changed.
    ConnectionStatus {
        /// Whether the bus connection is up.
        connected: bool,
        /// Human-readable detail.
        detail: String,
    },
    /// A programmer error was caught at the dispatch boundary.
    UnhandledException {
        /// Error description.
        detail: String,
        /// Offending payload, when available.
        payload: Option<Value>,
    },
}

impl ClientEvent {
    /// The wire name of this event.
    ///
    /// Payload events answer with their plugin signature, matching the
    /// per-signature subscription model.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ClientEvent::ClientBooted { .. } => event_names::CLIENT_BOOTED,
            ClientEvent::BlockchainAddress { .. } => event_names::BC_ADDRESS,
            ClientEvent::TopicSubscribed { .. } => event_names::CLIENT_SYS_TOPIC_SUBSCRIBE,
            ClientEvent::EngineRegistered { .. } => event_names::ENGINE_REGISTERED,
            ClientEvent::EngineDeregistered { .. } => event_names::ENGINE_DEREGISTERED,
            ClientEvent::EngineOnline { .. } => event_names::ENGINE_ONLINE,
            ClientEvent::EngineOffline { .. } => event_names::ENGINE_OFFLINE,
            ClientEvent::HeartbeatFromEngine { .. } => {
                event_names::RECEIVED_HEARTBEAT_FROM_ENGINE
            }
            ClientEvent::HeartbeatFromAddress { .. } => {
                event_names::RECEIVED_HEARTBEAT_FROM_ADDRESS
            }
            ClientEvent::Notification { .. } => event_names::NOTIFICATION_RECEIVED,
            ClientEvent::Payload { signature, .. } => signature,
            ClientEvent::SupervisorPayload { .. } => event_names::SUPERVISOR_PAYLOAD,
            ClientEvent::NetworkNodeDown { .. } => event_names::NETWORK_NODE_DOWN,
            ClientEvent::ConnectionStatus { .. } => event_names::CONNECTION_STATUS,
            ClientEvent::UnhandledException { .. } => event_names::UNHANDLED_EXCEPTION,
        }
    }
}
