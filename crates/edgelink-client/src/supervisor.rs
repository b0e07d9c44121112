//! # Supervisor Payload Extraction
//!
//! Supervisors publish their network view through the netmon plugin on
//! the administration pipeline. Those payloads refresh the address
//! directory and drive online/offline signalling; the extraction here is
//! shared by the payload workers and the client's alert reconciliation.

use edgelink_types::{Address, AddressBook, DownNode, PayloadPath};
use serde_json::{Map, Value};

/// Pipeline name reserved for node administration.
pub const ADMIN_PIPELINE: &str = "admin_pipeline";
/// Signature of the network-monitor plugin.
pub const NETMON_SIGNATURE: &str = "NET_MON_01";

/// Network view key: `node → address`.
pub const CURRENT_NETWORK: &str = "CURRENT_NETWORK";
/// Whether the supervisor currently alerts on nodes.
pub const IS_ALERT: &str = "IS_ALERT";
/// The alerted nodes (`node → last seen` or a plain list).
pub const CURRENT_ALERTED: &str = "CURRENT_ALERTED";

/// Whether a payload path addresses the netmon plugin on the admin
/// pipeline.
#[must_use]
pub fn is_supervisor_path(path: &PayloadPath) -> bool {
    path.pipeline.as_deref() == Some(ADMIN_PIPELINE)
        && path.signature.as_deref() == Some(NETMON_SIGNATURE)
}

/// Extract the `node → address` dictionary from a `CURRENT_NETWORK`
/// value.
///
/// Entries may map a node name directly to an address string or to an
/// object carrying an `address` field; unparsable entries are skipped.
#[must_use]
pub fn extract_address_book(data: &Map<String, Value>) -> AddressBook {
    let mut pairs = Vec::new();
    if let Some(network) = data.get(CURRENT_NETWORK).and_then(Value::as_object) {
        for (node, entry) in network {
            let raw = entry
                .as_str()
                .or_else(|| entry.get("address").and_then(Value::as_str));
            let Some(raw) = raw else { continue };
            if let Ok(address) = Address::parse(raw) {
                pairs.push((node.clone(), address));
            }
        }
    }
    AddressBook::from_pairs(pairs)
}

/// Extract the alerted-node list from `IS_ALERT` / `CURRENT_ALERTED`.
///
/// Returns the (possibly empty) current alert set; an unset `IS_ALERT`
/// counts as not alerting. `CURRENT_ALERTED` may be an object
/// (`node → last seen`) or a plain array of names.
#[must_use]
pub fn extract_alerted(data: &Map<String, Value>) -> Vec<DownNode> {
    if !data.get(IS_ALERT).and_then(Value::as_bool).unwrap_or(false) {
        return Vec::new();
    }

    match data.get(CURRENT_ALERTED) {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(node, last_seen)| DownNode {
                node: node.clone(),
                last_seen: last_seen.as_str().map(str::to_string),
            })
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|node| DownNode {
                node: node.to_string(),
                last_seen: None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// The supervisor's own status fields, lifted for the status report.
#[must_use]
pub fn extract_status(data: &Map<String, Value>) -> Value {
    let mut status = Map::new();
    for key in [IS_ALERT, CURRENT_ALERTED] {
        if let Some(value) = data.get(key) {
            status.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(status)
}
