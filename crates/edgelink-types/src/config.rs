//! # Client Configuration
//!
//! Unified configuration for the client, its worker pools and the state
//! backends. Plain structs with defaults; the client validates at boot.

use crate::fleet::FLEET_WILDCARD;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of generated process inbox channel ids.
pub const INBOX_ID_LEN: usize = 13;

/// Generate a random lowercase alphanumeric id of `len` characters.
pub fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

/// Generate a per-process inbox channel id.
#[must_use]
pub fn random_inbox_id() -> String {
    random_id(INBOX_ID_LEN)
}

/// Which shared-state backend the client runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StateBackendKind {
    /// Single-process, in-memory maps.
    #[default]
    Internal,
    /// Multi-process external cache with pub/sub fan-out.
    External,
}

/// Cryptographic identity options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainConfig {
    /// Hex-encoded PKCS#8 DER private key; generated when absent.
    pub key: Option<String>,
    /// Encrypt outgoing command payloads end to end.
    pub encrypt: bool,
    /// Drop inbound messages that fail signature verification.
    pub secure: bool,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            key: None,
            encrypt: true,
            secure: true,
        }
    }
}

/// External cache (multi-process backend) connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCacheConfig {
    /// Cache host.
    pub host: String,
    /// Cache port.
    pub port: u16,
    /// Optional password.
    pub password: Option<String>,
    /// Client-scoped broadcast channel; defaults to `updates-<initiator>`.
    pub pub_sub_channel: Option<String>,
}

impl Default for ExternalCacheConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            pub_sub_channel: None,
        }
    }
}

/// Message bus (MQTT) connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Broker URL (`mqtt://host:port` or `host:port`).
    pub url: String,
    /// Broker username.
    pub username: Option<String>,
    /// Broker password.
    pub password: Option<String>,
    /// Clean-session flag.
    pub clean: bool,
    /// Base client id; workers append a per-slot suffix so shared
    /// subscriptions load-balance.
    pub client_id: Option<String>,
    /// Optional topic prefix prepended to every composed topic.
    pub prefix: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "mqtt://127.0.0.1:1883".to_string(),
            username: None,
            password: None,
            clean: true,
            client_id: None,
            prefix: None,
        }
    }
}

/// Worker pool sizes per stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThreadCounts {
    /// Heartbeat workers.
    pub heartbeats: usize,
    /// Notification workers.
    pub notifications: usize,
    /// Payload workers.
    pub payloads: usize,
}

impl Default for ThreadCounts {
    fn default() -> Self {
        Self {
            heartbeats: 1,
            notifications: 1,
            payloads: 1,
        }
    }
}

impl ThreadCounts {
    /// Pool size for one stream kind.
    #[must_use]
    pub fn for_stream(&self, stream: crate::envelope::StreamKind) -> usize {
        match stream {
            crate::envelope::StreamKind::Heartbeats => self.heartbeats,
            crate::envelope::StreamKind::Notifications => self.notifications,
            crate::envelope::StreamKind::Payloads => self.payloads,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeClientConfig {
    /// The client's human-readable handle; auto-generated when absent.
    pub initiator: Option<String>,
    /// Identity and message security options.
    pub blockchain: BlockchainConfig,
    /// Shared-state backend selection.
    pub state_manager: StateBackendKind,
    /// External cache options (required for the external backend).
    pub external: ExternalCacheConfig,
    /// Bus connection options.
    pub bus: BusConfig,
    /// Worker pool sizes.
    pub threads: ThreadCounts,
    /// Initial fleet: addresses, node names, or `"*"`.
    pub fleet: Vec<String>,
    /// Topic namespace substituted for `$root`.
    pub topic_root: String,
}

impl Default for EdgeClientConfig {
    fn default() -> Self {
        Self {
            initiator: None,
            blockchain: BlockchainConfig::default(),
            state_manager: StateBackendKind::Internal,
            external: ExternalCacheConfig::default(),
            bus: BusConfig::default(),
            threads: ThreadCounts::default(),
            fleet: vec![FLEET_WILDCARD.to_string()],
            topic_root: "edgenet".to_string(),
        }
    }
}

impl EdgeClientConfig {
    /// The effective initiator id, generating one when absent.
    ///
    /// Call once at boot and store the result; every call with an absent
    /// `initiator` generates a fresh id.
    #[must_use]
    pub fn effective_initiator(&self) -> String {
        self.initiator
            .clone()
            .unwrap_or_else(|| format!("edge-{}", random_id(8)))
    }

    /// The client-scoped broadcast channel name for the external backend.
    #[must_use]
    pub fn broadcast_channel(&self, initiator: &str) -> String {
        self.external
            .pub_sub_channel
            .clone()
            .unwrap_or_else(|| format!("updates-{initiator}"))
    }
}
