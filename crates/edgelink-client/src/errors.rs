//! Client error types.

use edgelink_bus::BusError;
use edgelink_crypto::CryptoError;
use edgelink_state::StateError;
use edgelink_types::NotificationRecord;
use thiserror::Error;

/// Errors surfaced by the client facade.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The receiver is neither an address nor a resolvable node name.
    #[error("receiver not found: {0}")]
    ReceiverNotFound(String),

    /// A cryptographic operation failed; fatal at boot when loading the
    /// configured identity.
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    /// State manager failure.
    #[error("state manager error: {0}")]
    State(#[from] StateError),

    /// Bus failure.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// A plugin configuration failed its registered schema.
    #[error("schema validation failed for {signature}: {detail}")]
    Validation {
        /// Plugin signature the schema belongs to.
        signature: String,
        /// Validator detail.
        detail: String,
    },

    /// The client refuses new work while shutting down.
    #[error("client is shutting down")]
    ShuttingDown,

    /// Boot did not complete.
    #[error("boot failed: {0}")]
    BootFailed(String),
}

/// Why a pending request settled without resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Every target answered and at least one failed.
    TargetsFailed,
    /// An `EXCEPTION`-typed notification arrived on a watched path.
    Exception,
    /// A request timer fired.
    Timeout,
    /// Publishing the command to the bus failed.
    PublishFailed,
    /// The client shut down with the request outstanding.
    Shutdown,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::TargetsFailed => f.write_str("targets failed"),
            FailureReason::Exception => f.write_str("exception notification"),
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::PublishFailed => f.write_str("publish failed"),
            FailureReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// The failure payload handed to a request's caller: the reason plus every
/// notification accumulated for diagnostics.
#[derive(Debug, Clone)]
pub struct RequestFailure {
    /// Why the request rejected.
    pub reason: FailureReason,
    /// All notifications observed by the request, including the failing
    /// ones.
    pub notifications: Vec<NotificationRecord>,
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "request failed ({}) with {} notifications",
            self.reason,
            self.notifications.len()
        )
    }
}

impl std::error::Error for RequestFailure {}
