//! # Domain-Model Bridge
//!
//! The seam between the core engine and the domain models (pipelines,
//! plugin instances, data-capture threads, node managers). Models hold a
//! [`ModelBridge`] handle for state lookups and validated publishing; the
//! schema registry runs configuration validation before the core ever
//! sees an outbound command.

use crate::client::EdgeClient;
use crate::errors::ClientError;
use crate::registry::RequestHandle;
use edgelink_state::{HeartbeatSnapshot, SupervisorSnapshot};
use edgelink_types::commands::{
    INSTANCE_CONFIG, PAYLOAD_SIGNATURE,
};
use edgelink_types::{Address, CommandAction};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A plugin-configuration validator.
pub type SchemaValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Validators keyed by plugin signature.
///
/// Populated at construction; an unregistered signature passes validation
/// (the remote node is the authority for unknown plugins).
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    validators: Arc<RwLock<HashMap<String, SchemaValidator>>>,
}

impl SchemaRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validator for a plugin signature.
    pub fn register(&self, signature: &str, validator: SchemaValidator) {
        let mut validators = self
            .validators
            .write()
            .unwrap_or_else(|e| e.into_inner());
        validators.insert(signature.to_string(), validator);
    }

    /// Validate an instance configuration against its signature's schema.
    pub fn validate(&self, signature: &str, config: &Value) -> Result<(), ClientError> {
        let validators = self.validators.read().unwrap_or_else(|e| e.into_inner());
        match validators.get(signature) {
            Some(validator) => validator(config).map_err(|detail| ClientError::Validation {
                signature: signature.to_string(),
                detail,
            }),
            None => Ok(()),
        }
    }

    /// Number of registered schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        let validators = self.validators.read().unwrap_or_else(|e| e.into_inner());
        validators.len()
    }

    /// Whether no schema is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle handed to domain models.
#[derive(Clone)]
pub struct ModelBridge {
    client: EdgeClient,
}

impl ModelBridge {
    /// Wrap a booted client.
    #[must_use]
    pub fn new(client: EdgeClient) -> Self {
        Self { client }
    }

    /// Last heartbeat snapshot of a node.
    pub async fn node_info(
        &self,
        address: &Address,
    ) -> Result<Option<HeartbeatSnapshot>, ClientError> {
        self.client.get_node_info(address).await
    }

    /// Last network view of a supervisor.
    pub async fn network_snapshot(
        &self,
        supervisor: &Address,
    ) -> Result<Option<SupervisorSnapshot>, ClientError> {
        self.client.get_network_snapshot(supervisor).await
    }

    /// All addresses observed on the bus.
    pub async fn universe(
        &self,
    ) -> Result<std::collections::BTreeMap<String, u64>, ClientError> {
        self.client.get_universe().await
    }

    /// The schema registry models populate before issuing commands.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        self.client.schemas()
    }

    /// Validate and publish a command.
    ///
    /// Instance updates (single and batch) run their `INSTANCE_CONFIG`
    /// through the schema registered for their `SIGNATURE` before the
    /// core sees the message.
    pub async fn publish(
        &self,
        target: &str,
        action: CommandAction,
        payload: Value,
    ) -> Result<RequestHandle, ClientError> {
        self.validate_payload(action, &payload)?;
        self.client.send_command(target, action, payload).await
    }

    fn validate_payload(&self, action: CommandAction, payload: &Value) -> Result<(), ClientError> {
        match action {
            CommandAction::UpdatePipelineInstance => self.validate_instance(payload),
            CommandAction::BatchUpdatePipelineInstance => {
                for element in payload.as_array().into_iter().flatten() {
                    self.validate_instance(element)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn validate_instance(&self, element: &Value) -> Result<(), ClientError> {
        let (Some(signature), Some(config)) = (
            element.get(PAYLOAD_SIGNATURE).and_then(Value::as_str),
            element.get(INSTANCE_CONFIG),
        ) else {
            return Ok(());
        };
        self.schemas().validate(signature, config)
    }
}
