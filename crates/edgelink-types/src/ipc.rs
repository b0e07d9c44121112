//! # Worker IPC Messages
//!
//! The client task and its ingress workers communicate exclusively by
//! message passing: the client sends [`WorkerCommand`]s down a per-worker
//! channel, workers answer with [`WorkerReport`]s on a shared channel.
//! Workers never mutate client state directly and never let an error cross
//! the task boundary.

use crate::address::Address;
use crate::commands::NotificationRecord;
use crate::envelope::{PayloadPath, StreamKind};
use crate::fleet::FleetDelta;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identity of a worker inside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId {
    /// The stream this worker consumes.
    pub stream: StreamKind,
    /// Slot index within the stream's pool.
    pub index: usize,
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.stream, self.index)
    }
}

/// Bi-directional `node-name ⇄ address` map, refreshed from supervisor
/// payloads and broadcast to workers and peer processes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBook {
    /// `node name → canonical address`.
    pub nodes: BTreeMap<String, Address>,
}

impl AddressBook {
    /// Build from `(name, address)` pairs.
    pub fn from_pairs<I: IntoIterator<Item = (String, Address)>>(pairs: I) -> Self {
        Self {
            nodes: pairs.into_iter().collect(),
        }
    }

    /// Resolve a node name to its address.
    #[must_use]
    pub fn address_of(&self, node: &str) -> Option<&Address> {
        self.nodes.get(node)
    }

    /// Reverse lookup of the last-known name for an address.
    #[must_use]
    pub fn node_of(&self, address: &Address) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(_, a)| *a == address)
            .map(|(n, _)| n.as_str())
    }

    /// Number of known nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the book is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Commands the client pushes down to a worker.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// Replace the worker's per-address pipeline map used for context
    /// enrichment.
    UpdateState {
        /// Node address the state belongs to.
        address: Address,
        /// The node's pipeline map.
        state: Value,
    },
    /// Apply a fleet membership delta.
    UpdateFleet(FleetDelta),
    /// Replace the worker's copy of the address directory.
    RefreshAddresses(AddressBook),
    /// Route notifications matching a request's watches or session id to
    /// an inbox (notification workers).
    WatchForSessionId {
        /// The pending request id (`SESSION_ID` on the wire).
        session_id: String,
        /// Inbox to deliver matches to.
        inbox_id: String,
        /// Watched notification paths.
        paths: Vec<PayloadPath>,
    },
    /// Remove a request's watches (notification workers).
    IgnoreSessionId {
        /// The pending request id.
        session_id: String,
        /// Inbox the watches belonged to.
        inbox_id: String,
        /// Previously watched paths.
        paths: Vec<PayloadPath>,
    },
    /// Pin payloads carrying a sticky command id to an inbox (payload
    /// workers).
    WatchForStickySessionId {
        /// `__COMMAND_ID` value to pin.
        sticky_id: String,
        /// Inbox to deliver pinned payloads to.
        inbox_id: String,
    },
    /// Request a memory report.
    MemoryUsage,
    /// Drain and exit.
    Shutdown,
}

/// A fully decoded inbound message, after verification, decryption,
/// formatting and per-kind decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedMessage {
    /// Stream the message arrived on.
    pub stream: StreamKind,
    /// Verified sender address.
    pub sender: Address,
    /// Payload path of the event.
    pub path: PayloadPath,
    /// Decoded data portion.
    pub data: Value,
    /// Context assembled from the worker's node/pipeline state.
    pub context: MessageContext,
}

/// Context assembled around a message from the worker's local state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContext {
    /// Pipeline configuration at `state[node][pipeline]`, when known.
    pub pipeline: Option<Value>,
    /// Plugin instance state at `...plugins[signature][instance]`, when
    /// known.
    pub instance: Option<Value>,
    /// Stream-specific metadata (notification code/type/tag, plugin and
    /// pipeline meta).
    pub metadata: Value,
}

/// Per-worker counters reported on demand and aggregated by telemetry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryReport {
    /// Frames received from the bus.
    pub frames_received: u64,
    /// Frames dropped by the decode pipeline.
    pub frames_dropped: u64,
    /// Frames fully processed.
    pub frames_processed: u64,
    /// Entries in the notification watchlist.
    pub watch_entries: usize,
    /// Entries in the sticky-session map.
    pub sticky_entries: usize,
    /// Node entries in the local state copy.
    pub state_nodes: usize,
}

/// A node flagged as down by a supervisor alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownNode {
    /// Human node name from the alert list.
    pub node: String,
    /// Last-seen stamp reported by the supervisor, when present.
    pub last_seen: Option<String>,
}

/// Reports a worker posts back to the client.
#[derive(Debug, Clone)]
pub enum WorkerReport {
    /// Subscription established, decode loop running.
    Started(WorkerId),
    /// Worker drained and exited.
    Stopped(WorkerId),
    /// An envelope from this address was observed (pre fleet filter);
    /// feeds the universe.
    Observed {
        /// Reporting worker.
        worker: WorkerId,
        /// Verified sender.
        address: Address,
        /// Observation time, unix ms.
        timestamp_ms: u64,
    },
    /// A fully decoded message for state updates and application events.
    Message {
        /// Reporting worker.
        worker: WorkerId,
        /// The decoded message.
        message: Box<ProcessedMessage>,
    },
    /// A notification matched a watched path or session id.
    RequestResponse {
        /// Inbox the match belongs to.
        inbox_id: String,
        /// The matching notification.
        record: NotificationRecord,
    },
    /// A payload was pinned to an inbox by its sticky command id.
    StickyPayload {
        /// Inbox the payload is pinned to.
        inbox_id: String,
        /// The decoded payload message.
        message: Box<ProcessedMessage>,
    },
    /// Supervisor status extracted from an `admin_pipeline` payload.
    SupervisorStatus {
        /// Supervisor address.
        supervisor: Address,
        /// Raw status value.
        status: Value,
    },
    /// `node → address` dictionary extracted from a supervisor's network
    /// view.
    AddressesRefresh(AddressBook),
    /// Nodes currently alerted as down by a supervisor.
    NodesDown {
        /// Supervisor address that raised the alert.
        supervisor: Address,
        /// The alerted nodes.
        nodes: Vec<DownNode>,
    },
    /// The supervisor's full network-view payload.
    SupervisorPayload {
        /// Supervisor address.
        supervisor: Address,
        /// The decoded payload message.
        message: Box<ProcessedMessage>,
    },
    /// Answer to [`WorkerCommand::MemoryUsage`].
    Memory {
        /// Reporting worker.
        worker: WorkerId,
        /// The counters.
        report: MemoryReport,
    },
    /// Bus connectivity change observed by this worker.
    Transport {
        /// Reporting worker.
        worker: WorkerId,
        /// Whether the connection is up.
        connected: bool,
        /// Human-readable detail.
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> Address {
        let mut bytes = [7u8; 33];
        bytes[0] = 0x03;
        bytes[32] = tag;
        Address::from_compressed_bytes(&bytes)
    }

    #[test]
    fn test_worker_id_display() {
        let id = WorkerId {
            stream: StreamKind::Payloads,
            index: 2,
        };
        assert_eq!(id.to_string(), "payloads-2");
    }

    #[test]
    fn test_address_book_lookups() {
        let a = addr(1);
        let book = AddressBook::from_pairs([("gts-node-01".to_string(), a.clone())]);

        assert_eq!(book.address_of("gts-node-01"), Some(&a));
        assert_eq!(book.node_of(&a), Some("gts-node-01"));
        assert!(book.address_of("other").is_none());
    }
}
