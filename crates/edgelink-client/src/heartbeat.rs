//! # Heartbeat Decoding
//!
//! Heartbeats may carry the bulk of their state zlib-compressed in
//! `ENCODED_DATA`. After inflation the flat data splits into a structured
//! view: node info, hardware stats, and a per-pipeline map where each
//! pipeline's configuration is paired with the live stats of its active
//! plugin instances, keyed by `(stream, signature, instance)`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use serde_json::{json, Map, Value};
use std::io::Read;
use tracing::debug;

/// Compressed-state key inside heartbeat data.
pub const ENCODED_DATA: &str = "ENCODED_DATA";
/// Pipeline configuration list key.
pub const CONFIG_STREAMS: &str = "CONFIG_STREAMS";
/// Active plugin stats list key.
pub const ACTIVE_PLUGINS: &str = "ACTIVE_PLUGINS";
/// Pipeline name key inside a configuration entry.
pub const NAME: &str = "NAME";
/// Pipeline reference key inside a plugin stats entry.
pub const STREAM_ID: &str = "STREAM_ID";
/// Plugin signature key.
pub const SIGNATURE: &str = "SIGNATURE";
/// Plugin instance id key.
pub const INSTANCE_ID: &str = "INSTANCE_ID";

/// Pipeline-map keys of the structured view.
pub const CONFIG: &str = "CONFIG";
/// Plugins sub-map key of the structured view.
pub const PLUGINS: &str = "PLUGINS";

/// Node-level keys lifted into the `node` view.
const NODE_KEYS: [&str; 6] = [
    "MACHINE_IP",
    "MACHINE_MEMORY",
    "UPTIME",
    "VERSION",
    "LOGGER_VERSION",
    "TOTAL_MESSAGES",
];

/// Hardware keys lifted into the `hardware` view.
const HARDWARE_KEYS: [&str; 9] = [
    "CPU",
    "CPU_USED",
    "GPUS",
    "GPU_INFO",
    "MEMORY",
    "AVAILABLE_MEMORY",
    "PROCESS_MEMORY",
    "DISK",
    "AVAILABLE_DISK",
];

/// The structured form of one heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatView {
    /// Full decoded data, compressed portion merged in.
    pub raw: Value,
    /// `pipeline name → { CONFIG, PLUGINS: { signature → { instance →
    /// stats } } }`.
    pub pipelines: Value,
    /// Node identity and runtime info.
    pub node: Value,
    /// Hardware utilisation stats.
    pub hardware: Value,
}

/// Inflate `ENCODED_DATA` (base64 of zlib) and merge it into the data
/// object. The compressed fields never override explicit ones.
#[must_use]
pub fn inflate_encoded_data(mut data: Map<String, Value>) -> Map<String, Value> {
    let Some(encoded) = data.get(ENCODED_DATA).and_then(Value::as_str) else {
        return data;
    };

    let Ok(compressed) = STANDARD.decode(encoded) else {
        debug!("heartbeat ENCODED_DATA is not base64, kept as-is");
        return data;
    };

    let mut inflated = Vec::new();
    if ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut inflated)
        .is_err()
    {
        debug!("heartbeat ENCODED_DATA did not inflate, kept as-is");
        return data;
    }

    match serde_json::from_slice::<Value>(&inflated) {
        Ok(Value::Object(extra)) => {
            data.remove(ENCODED_DATA);
            for (key, value) in extra {
                data.entry(key).or_insert(value);
            }
        }
        _ => debug!("inflated heartbeat data is not a JSON object, kept as-is"),
    }
    data
}

/// Decode a heartbeat's data object into the structured view.
#[must_use]
pub fn decode_heartbeat(data: Map<String, Value>) -> HeartbeatView {
    let data = inflate_encoded_data(data);

    let pipelines = build_pipeline_map(&data);
    let node = lift_keys(&data, &NODE_KEYS);
    let hardware = lift_keys(&data, &HARDWARE_KEYS);

    HeartbeatView {
        raw: Value::Object(data),
        pipelines,
        node,
        hardware,
    }
}

fn lift_keys(data: &Map<String, Value>, keys: &[&str]) -> Value {
    let mut out = Map::new();
    for key in keys {
        if let Some(value) = data.get(*key) {
            out.insert((*key).to_string(), value.clone());
        }
    }
    Value::Object(out)
}

/// Pair each configured pipeline with the stats of its active plugin
/// instances.
fn build_pipeline_map(data: &Map<String, Value>) -> Value {
    let mut pipelines = Map::new();

    if let Some(streams) = data.get(CONFIG_STREAMS).and_then(Value::as_array) {
        for config in streams {
            let Some(name) = config.get(NAME).and_then(Value::as_str) else {
                continue;
            };
            pipelines.insert(
                name.to_string(),
                json!({ CONFIG: config, PLUGINS: {} }),
            );
        }
    }

    if let Some(actives) = data.get(ACTIVE_PLUGINS).and_then(Value::as_array) {
        for stats in actives {
            let Some(stream) = stats.get(STREAM_ID).and_then(Value::as_str) else {
                continue;
            };
            let Some(signature) = stats.get(SIGNATURE).and_then(Value::as_str) else {
                continue;
            };
            let Some(instance) = stats.get(INSTANCE_ID).and_then(Value::as_str) else {
                continue;
            };

            let entry = pipelines
                .entry(stream.to_string())
                .or_insert_with(|| json!({ CONFIG: Value::Null, PLUGINS: {} }));
            if let Some(plugins) = entry.get_mut(PLUGINS).and_then(Value::as_object_mut) {
                let per_signature = plugins
                    .entry(signature.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(instances) = per_signature.as_object_mut() {
                    instances.insert(instance.to_string(), stats.clone());
                }
            }
        }
    }

    Value::Object(pipelines)
}
