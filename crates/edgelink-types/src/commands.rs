//! # Commands and Notifications
//!
//! The command kinds a client can publish towards a node, and the typed
//! view of the notifications that settle them.
//!
//! Notification codes are kept as string constants for wire compatibility
//! with deployed supervisors; the pending-request strategies interpret them
//! per command family.

use crate::envelope::PayloadPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command kinds that open a pending request when published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandAction {
    /// Reconfigure a single plugin instance.
    UpdatePipelineInstance,
    /// Reconfigure several plugin instances atomically.
    BatchUpdatePipelineInstance,
    /// Replace a pipeline configuration.
    UpdateConfig,
    /// Issue a pipeline-level command.
    PipelineCommand,
    /// Archive (decommission) a pipeline.
    ArchiveConfig,
}

impl CommandAction {
    /// Wire value carried in the `ACTION` field.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CommandAction::UpdatePipelineInstance => "UPDATE_PIPELINE_INSTANCE",
            CommandAction::BatchUpdatePipelineInstance => "BATCH_UPDATE_PIPELINE_INSTANCE",
            CommandAction::UpdateConfig => "UPDATE_CONFIG",
            CommandAction::PipelineCommand => "PIPELINE_COMMAND",
            CommandAction::ArchiveConfig => "ARCHIVE_CONFIG",
        }
    }

    /// Inverse of [`CommandAction::as_str`].
    #[must_use]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "UPDATE_PIPELINE_INSTANCE" => Some(CommandAction::UpdatePipelineInstance),
            "BATCH_UPDATE_PIPELINE_INSTANCE" => Some(CommandAction::BatchUpdatePipelineInstance),
            "UPDATE_CONFIG" => Some(CommandAction::UpdateConfig),
            "PIPELINE_COMMAND" => Some(CommandAction::PipelineCommand),
            "ARCHIVE_CONFIG" => Some(CommandAction::ArchiveConfig),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command parameter block inside payload data.
pub const COMMAND_PARAMS: &str = "COMMAND_PARAMS";
/// Sticky routing hint inside command parameters.
pub const STICKY_COMMAND_ID: &str = "__COMMAND_ID";
/// Instance configuration block of an instance update.
pub const INSTANCE_CONFIG: &str = "INSTANCE_CONFIG";
/// Instance command block inside an instance configuration.
pub const INSTANCE_COMMAND: &str = "INSTANCE_COMMAND";
/// Pipeline command block of a pipeline-level command.
pub const PIPELINE_COMMAND: &str = "PIPELINE_COMMAND";
/// Pipeline name field of command payloads.
pub const PAYLOAD_NAME: &str = "NAME";
/// Plugin signature field of command payloads.
pub const PAYLOAD_SIGNATURE: &str = "SIGNATURE";
/// Plugin instance id field of command payloads.
pub const PAYLOAD_INSTANCE_ID: &str = "INSTANCE_ID";

/// Notification body field names.
pub const NOTIFICATION_CODE: &str = "NOTIFICATION_CODE";
/// Notification type field name.
pub const NOTIFICATION_TYPE: &str = "NOTIFICATION_TYPE";
/// Notification tag field name.
pub const NOTIFICATION_TAG: &str = "NOTIFICATION_TAG";
/// Free-form notification text field name.
pub const NOTIFICATION: &str = "NOTIFICATION";

/// Notification type values.
pub mod notification_types {
    /// Informational acknowledgement.
    pub const NORMAL: &str = "NORMAL";
    /// Remote abnormal condition; forces the owning request to reject.
    pub const EXCEPTION: &str = "EXCEPTION";
    /// Remote warning; does not settle targets by itself.
    pub const ABNORMAL: &str = "ABNORMAL";
}

/// Notification code values, grouped by the command family that watches
/// them.
pub mod notification_codes {
    /// Pipeline accepted a new configuration.
    pub const PIPELINE_OK: &str = "PIPELINE_OK";
    /// Pipeline rejected a new configuration.
    pub const PIPELINE_FAILED: &str = "PIPELINE_FAILED";
    /// Pipeline archive completed.
    pub const PIPELINE_ARCHIVE_OK: &str = "PIPELINE_ARCHIVE_OK";
    /// Pipeline archive failed.
    pub const PIPELINE_ARCHIVE_FAILED: &str = "PIPELINE_ARCHIVE_FAILED";
    /// Data-capture thread accepted a configuration.
    pub const PIPELINE_DCT_CONFIG_OK: &str = "PIPELINE_DCT_CONFIG_OK";
    /// Data-capture thread rejected a configuration.
    pub const PIPELINE_DCT_CONFIG_FAILED: &str = "PIPELINE_DCT_CONFIG_FAILED";

    /// Plugin instance accepted a configuration.
    pub const PLUGIN_OK: &str = "PLUGIN_OK";
    /// Plugin instance rejected a configuration.
    pub const PLUGIN_FAILED: &str = "PLUGIN_FAILED";
    /// Plugin instance executed a command.
    pub const PLUGIN_INSTANCE_COMMAND_OK: &str = "PLUGIN_INSTANCE_COMMAND_OK";
    /// Plugin instance failed a command.
    pub const PLUGIN_INSTANCE_COMMAND_FAILED: &str = "PLUGIN_INSTANCE_COMMAND_FAILED";
    /// Plugin instance paused.
    pub const PLUGIN_PAUSE_OK: &str = "PLUGIN_PAUSE_OK";
    /// Plugin instance failed to pause.
    pub const PLUGIN_PAUSE_FAILED: &str = "PLUGIN_PAUSE_FAILED";
    /// Plugin instance resumed.
    pub const PLUGIN_RESUME_OK: &str = "PLUGIN_RESUME_OK";
    /// Plugin instance failed to resume.
    pub const PLUGIN_RESUME_FAILED: &str = "PLUGIN_RESUME_FAILED";
    /// Plugin instance applied a working-hours schedule.
    pub const PLUGIN_WORKING_HOURS_OK: &str = "PLUGIN_WORKING_HOURS_OK";
    /// Plugin instance rejected a working-hours schedule.
    pub const PLUGIN_WORKING_HOURS_FAILED: &str = "PLUGIN_WORKING_HOURS_FAILED";
    /// Plugin instance accepted a configuration while paused.
    pub const PLUGIN_CONFIG_IN_PAUSE_OK: &str = "PLUGIN_CONFIG_IN_PAUSE_OK";
    /// Plugin instance rejected a configuration while paused.
    pub const PLUGIN_CONFIG_IN_PAUSE_FAILED: &str = "PLUGIN_CONFIG_IN_PAUSE_FAILED";
}

/// A decoded network notification, as routed to pending requests and to
/// the application event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// `NOTIFICATION_CODE`, when present.
    pub code: Option<String>,
    /// `NOTIFICATION_TYPE`, when present.
    pub kind: Option<String>,
    /// `NOTIFICATION_TAG`, when present.
    pub tag: Option<String>,
    /// `SESSION_ID` correlating back to a pending request.
    pub session_id: Option<String>,
    /// Path of the object the notification refers to.
    pub path: PayloadPath,
    /// The full decoded notification body.
    pub payload: Value,
}

impl NotificationRecord {
    /// Build a record from a decoded notification body and its path.
    #[must_use]
    pub fn from_body(path: PayloadPath, body: &Value) -> Self {
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            code: text(NOTIFICATION_CODE),
            kind: text(NOTIFICATION_TYPE),
            tag: text(NOTIFICATION_TAG),
            session_id: text(crate::envelope::SESSION_ID),
            path,
            payload: body.clone(),
        }
    }

    /// Whether this notification carries the `EXCEPTION` type.
    #[must_use]
    pub fn is_exception(&self) -> bool {
        self.kind.as_deref() == Some(notification_types::EXCEPTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_round_trip() {
        for action in [
            CommandAction::UpdatePipelineInstance,
            CommandAction::BatchUpdatePipelineInstance,
            CommandAction::UpdateConfig,
            CommandAction::PipelineCommand,
            CommandAction::ArchiveConfig,
        ] {
            assert_eq!(CommandAction::from_str_opt(action.as_str()), Some(action));
        }
        assert_eq!(CommandAction::from_str_opt("NOPE"), None);
    }

    #[test]
    fn test_record_from_body() {
        let body = json!({
            "NOTIFICATION_CODE": "PLUGIN_OK",
            "NOTIFICATION_TYPE": "NORMAL",
            "SESSION_ID": "req-1",
            "NOTIFICATION": "instance updated",
        });
        let record = NotificationRecord::from_body(PayloadPath::pipeline("n", "p"), &body);
        assert_eq!(record.code.as_deref(), Some("PLUGIN_OK"));
        assert_eq!(record.session_id.as_deref(), Some("req-1"));
        assert!(!record.is_exception());
    }

    #[test]
    fn test_exception_detection() {
        let body = json!({ "NOTIFICATION_TYPE": "EXCEPTION" });
        let record = NotificationRecord::from_body(PayloadPath::node("n"), &body);
        assert!(record.is_exception());
    }
}
