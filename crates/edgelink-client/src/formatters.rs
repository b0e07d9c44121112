//! # Formatter Registry
//!
//! Formatters translate between a sender's wire layout and the canonical
//! `envelope + DATA` shape the decode pipeline works on. The registry is
//! populated at construction time; there is no runtime code loading, and
//! custom formatters are plugins registered on the builder.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use edgelink_types::envelope::DATA;

/// Name of the default formatter.
pub const RAW_FORMATTER: &str = "raw";
/// Name of the pass-through formatter.
pub const IDENTITY_FORMATTER: &str = "identity";

/// A payload formatter.
pub trait Formatter: Send + Sync {
    /// Reshape a verified, decrypted envelope into canonical form.
    ///
    /// `None` drops the message (malformed for this format).
    fn decode(&self, envelope: Map<String, Value>) -> Option<Map<String, Value>>;
}

/// The default formatter: envelope keys (`EE_*`) stay top level, every
/// other key moves under `DATA`.
struct RawFormatter;

impl Formatter for RawFormatter {
    fn decode(&self, envelope: Map<String, Value>) -> Option<Map<String, Value>> {
        let mut out = Map::new();
        let mut data = Map::new();
        for (key, value) in envelope {
            if key.starts_with("EE_") {
                out.insert(key, value);
            } else {
                data.insert(key, value);
            }
        }
        out.insert(DATA.to_string(), Value::Object(data));
        Some(out)
    }
}

/// The no-op formatter.
struct IdentityFormatter;

impl Formatter for IdentityFormatter {
    fn decode(&self, envelope: Map<String, Value>) -> Option<Map<String, Value>> {
        Some(envelope)
    }
}

/// Formatter lookup by lower-cased `EE_FORMATTER` value.
#[derive(Clone)]
pub struct FormatterRegistry {
    formatters: HashMap<String, Arc<dyn Formatter>>,
}

impl FormatterRegistry {
    /// Registry with the built-in formatters.
    #[must_use]
    pub fn new() -> Self {
        let mut formatters: HashMap<String, Arc<dyn Formatter>> = HashMap::new();
        formatters.insert(RAW_FORMATTER.to_string(), Arc::new(RawFormatter));
        formatters.insert(IDENTITY_FORMATTER.to_string(), Arc::new(IdentityFormatter));
        Self { formatters }
    }

    /// Register a custom formatter under a (lower-cased) name.
    pub fn register(&mut self, name: &str, formatter: Arc<dyn Formatter>) {
        self.formatters.insert(name.to_lowercase(), formatter);
    }

    /// Look up a formatter; names are matched lower-cased, an absent name
    /// selects `raw`.
    #[must_use]
    pub fn get(&self, name: Option<&str>) -> Option<&Arc<dyn Formatter>> {
        let key = name.map_or_else(|| RAW_FORMATTER.to_string(), str::to_lowercase);
        self.formatters.get(&key)
    }
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> Map<String, Value> {
        json!({
            "EE_SENDER": "0xai_x",
            "EE_EVENT_TYPE": "PAYLOAD",
            "EE_PAYLOAD_PATH": ["n", null, null, null],
            "ENCODED_DATA": "abc",
            "COMMAND_PARAMS": { "K": 1 },
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_raw_partitions_envelope_and_data() {
        let registry = FormatterRegistry::new();
        let decoded = registry.get(None).unwrap().decode(envelope()).unwrap();

        assert!(decoded.contains_key("EE_SENDER"));
        assert!(decoded.contains_key("EE_PAYLOAD_PATH"));
        assert!(!decoded.contains_key("ENCODED_DATA"));

        let data = decoded.get(DATA).and_then(Value::as_object).unwrap();
        assert!(data.contains_key("ENCODED_DATA"));
        assert!(data.contains_key("COMMAND_PARAMS"));
        assert!(!data.contains_key("EE_SENDER"));
    }

    #[test]
    fn test_raw_with_full_envelope_and_single_payload_key() {
        // A fully stamped envelope plus one payload key: every EE_* field
        // stays top level, the single payload key lands under DATA.
        let envelope = json!({
            "EE_SIGN": "sig", "EE_SENDER": "0xai_x", "EE_HASH": "h",
            "EE_PAYLOAD_PATH": ["n", null, null, null],
            "EE_EVENT_TYPE": "HEARTBEAT",
            "EE_ID": "1", "EE_MESSAGE_ID": "2", "EE_MESSAGE_SEQ": 1,
            "EE_TOTAL_MESSAGES": 1, "EE_TIMESTAMP": "t", "EE_TIMEZONE": "UTC",
            "EE_FORMATTER": "raw", "EE_IS_ENCRYPTED": false,
            "EE_ENCRYPTED_DATA": null, "EE_VERSION": "3", "EE_INITIATOR": "i",
            "EE_SESSION": "s",
            "ENCODED_DATA": "abc",
        })
        .as_object()
        .cloned()
        .unwrap();
        assert_eq!(envelope.len(), 18);

        let registry = FormatterRegistry::new();
        let decoded = registry.get(Some("raw")).unwrap().decode(envelope).unwrap();

        let data = decoded.get(DATA).and_then(Value::as_object).unwrap();
        assert_eq!(data.len(), 1);
        assert!(data.contains_key("ENCODED_DATA"));
        // 17 envelope fields survive at top level, plus DATA itself.
        assert_eq!(decoded.len(), 18);
        assert!(decoded.keys().all(|k| k.starts_with("EE_") || k == DATA));
    }

    #[test]
    fn test_identity_is_noop() {
        let registry = FormatterRegistry::new();
        let input = envelope();
        let decoded = registry
            .get(Some("IDENTITY"))
            .unwrap()
            .decode(input.clone())
            .unwrap();
        assert_eq!(Value::Object(decoded), Value::Object(input));
    }

    #[test]
    fn test_unknown_formatter_is_none() {
        let registry = FormatterRegistry::new();
        assert!(registry.get(Some("protobuf")).is_none());
    }

    #[test]
    fn test_custom_formatter_registration() {
        struct Upper;
        impl Formatter for Upper {
            fn decode(&self, mut envelope: Map<String, Value>) -> Option<Map<String, Value>> {
                envelope.insert("UPPER".to_string(), Value::Bool(true));
                Some(envelope)
            }
        }

        let mut registry = FormatterRegistry::new();
        registry.register("MyFormat", Arc::new(Upper));

        let decoded = registry
            .get(Some("myformat"))
            .unwrap()
            .decode(Map::new())
            .unwrap();
        assert_eq!(decoded.get("UPPER"), Some(&Value::Bool(true)));
    }
}
