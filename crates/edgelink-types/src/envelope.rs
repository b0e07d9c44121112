//! # Envelope Vocabulary
//!
//! Field constants of the signed message envelope, the payload path that
//! addresses an event inside a remote node's hierarchy, and the three
//! ingress stream kinds.
//!
//! The canonical signature of an envelope is computed over the JSON object
//! with [`EE_SIGN`], [`EE_SENDER`] and [`EE_HASH`] removed, serialized with
//! lexicographic key order and no insignificant whitespace (see the crypto
//! crate).

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// ENVELOPE FIELDS
// =============================================================================

/// URL-safe base64 DER signature over the canonical serialization.
pub const EE_SIGN: &str = "EE_SIGN";
/// Canonical sender address.
pub const EE_SENDER: &str = "EE_SENDER";
/// Lowercase hex SHA-256 of the canonical serialization.
pub const EE_HASH: &str = "EE_HASH";
/// `[node, pipeline|null, signature|null, instance|null]`.
pub const EE_PAYLOAD_PATH: &str = "EE_PAYLOAD_PATH";
/// One of `HEARTBEAT`, `NOTIFICATION`, `PAYLOAD`.
pub const EE_EVENT_TYPE: &str = "EE_EVENT_TYPE";
/// Unique message id.
pub const EE_ID: &str = "EE_ID";
/// Logical message id for multi-part messages.
pub const EE_MESSAGE_ID: &str = "EE_MESSAGE_ID";
/// Sequence number within a multi-part message.
pub const EE_MESSAGE_SEQ: &str = "EE_MESSAGE_SEQ";
/// Total parts of a multi-part message.
pub const EE_TOTAL_MESSAGES: &str = "EE_TOTAL_MESSAGES";
/// Sender-side ISO timestamp.
pub const EE_TIMESTAMP: &str = "EE_TIMESTAMP";
/// Sender-side timezone label.
pub const EE_TIMEZONE: &str = "EE_TIMEZONE";
/// Name of the formatter that encoded the payload (defaults to `raw`).
pub const EE_FORMATTER: &str = "EE_FORMATTER";
/// Marks an end-to-end encrypted envelope.
pub const EE_IS_ENCRYPTED: &str = "EE_IS_ENCRYPTED";
/// Base64 of `nonce(12) ‖ ciphertext ‖ tag(16)`.
pub const EE_ENCRYPTED_DATA: &str = "EE_ENCRYPTED_DATA";

// =============================================================================
// COMMAND FIELDS (outbound config messages)
// =============================================================================

/// Command kind of an outbound message.
pub const ACTION: &str = "ACTION";
/// Command payload of an outbound message.
pub const PAYLOAD: &str = "PAYLOAD";
/// The client's human-readable handle.
pub const INITIATOR_ID: &str = "INITIATOR_ID";
/// Correlation id linking notifications back to a pending request.
pub const SESSION_ID: &str = "SESSION_ID";
/// Outbound stamp time.
pub const TIME: &str = "TIME";

/// Key under which the `raw` formatter nests non-envelope fields.
pub const DATA: &str = "DATA";

// =============================================================================
// STREAMS
// =============================================================================

/// The three ingress stream kinds a client consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Node liveness and full node state snapshots.
    Heartbeats,
    /// Command acknowledgements and alerts.
    Notifications,
    /// Plugin instance output.
    Payloads,
}

impl StreamKind {
    /// All stream kinds, in boot order.
    pub const ALL: [StreamKind; 3] = [
        StreamKind::Heartbeats,
        StreamKind::Notifications,
        StreamKind::Payloads,
    ];

    /// Lowercase identifier used in configuration and logging.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Heartbeats => "heartbeats",
            StreamKind::Notifications => "notifications",
            StreamKind::Payloads => "payloads",
        }
    }

    /// Topic suffix of the stream on the bus.
    #[must_use]
    pub fn topic_suffix(self) -> &'static str {
        match self {
            StreamKind::Heartbeats => "ctrl",
            StreamKind::Notifications => "notif",
            StreamKind::Payloads => "payloads",
        }
    }

    /// The `EE_EVENT_TYPE` value carried by envelopes of this stream.
    #[must_use]
    pub fn event_type(self) -> &'static str {
        match self {
            StreamKind::Heartbeats => "HEARTBEAT",
            StreamKind::Notifications => "NOTIFICATION",
            StreamKind::Payloads => "PAYLOAD",
        }
    }

    /// Inverse of [`StreamKind::event_type`].
    #[must_use]
    pub fn from_event_type(value: &str) -> Option<Self> {
        match value {
            "HEARTBEAT" => Some(StreamKind::Heartbeats),
            "NOTIFICATION" => Some(StreamKind::Notifications),
            "PAYLOAD" => Some(StreamKind::Payloads),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PAYLOAD PATH
// =============================================================================

/// The address of an event inside a remote node's hierarchy:
/// `[node, pipeline|null, signature|null, instance|null]`.
///
/// The node segment is the sender's network address for all current
/// senders; heartbeat state is indexed by it end to end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadPath {
    /// Node identifier (address for current senders).
    pub node: String,
    /// Pipeline name, when the event is scoped to one.
    pub pipeline: Option<String>,
    /// Plugin signature, when the event is scoped to a plugin.
    pub signature: Option<String>,
    /// Plugin instance id, when the event is scoped to an instance.
    pub instance: Option<String>,
}

impl PayloadPath {
    /// Node-level path (`[node, null, null, null]`).
    pub fn node(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            pipeline: None,
            signature: None,
            instance: None,
        }
    }

    /// Pipeline-level path (`[node, pipeline, null, null]`).
    pub fn pipeline(node: impl Into<String>, pipeline: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            pipeline: Some(pipeline.into()),
            signature: None,
            instance: None,
        }
    }

    /// Instance-level path.
    pub fn instance(
        node: impl Into<String>,
        pipeline: impl Into<String>,
        signature: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            pipeline: Some(pipeline.into()),
            signature: Some(signature.into()),
            instance: Some(instance.into()),
        }
    }

    /// Parse from the JSON array form carried in [`EE_PAYLOAD_PATH`].
    ///
    /// Accepts 1 to 4 elements; missing or `null` tail segments are `None`.
    /// Returns `None` when the value is not an array or the node segment is
    /// missing.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let arr = value.as_array()?;
        let node = arr.first()?.as_str()?.to_string();
        let seg = |i: usize| -> Option<String> {
            arr.get(i).and_then(Value::as_str).map(str::to_string)
        };
        Some(Self {
            node,
            pipeline: seg(1),
            signature: seg(2),
            instance: seg(3),
        })
    }

    /// The JSON array form for outbound envelopes.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let opt = |s: &Option<String>| match s {
            Some(v) => Value::String(v.clone()),
            None => Value::Null,
        };
        Value::Array(vec![
            Value::String(self.node.clone()),
            opt(&self.pipeline),
            opt(&self.signature),
            opt(&self.instance),
        ])
    }

    /// Index key of this path: segments joined with `:`, `null` as empty.
    ///
    /// This is the key format of the pending-request target map and the
    /// notification watchlists.
    #[must_use]
    pub fn path_key(&self) -> String {
        let opt = |s: &Option<String>| s.as_deref().unwrap_or("").to_string();
        format!(
            "{}:{}:{}:{}",
            self.node,
            opt(&self.pipeline),
            opt(&self.signature),
            opt(&self.instance)
        )
    }
}
