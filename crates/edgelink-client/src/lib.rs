//! # Edgelink Client
//!
//! The ingress/dispatch engine and request-response transaction layer of
//! the SDK.
//!
//! ## Architecture
//!
//! - [`IngressWorker`]: one task per pool slot; owns a bus subscription
//!   and runs the decode pipeline serially. Workers talk to the client
//!   only through typed command/report messages.
//! - [`PendingRequestRegistry`]: outstanding commands, their watched
//!   notification paths, settlement strategies and timers.
//! - [`EdgeClient`]: boot sequencing, fleet membership, outbound publish
//!   with optional end-to-end encryption, event emission.
//! - [`ModelBridge`]: the seam domain models use for state lookups,
//!   validated publishing and schema registration.

pub mod bridge;
pub mod client;
pub mod emitter;
pub mod errors;
pub mod formatters;
pub mod heartbeat;
pub mod registry;
pub mod supervisor;
pub mod worker;

pub use bridge::{ModelBridge, SchemaRegistry};
pub use client::{EdgeClient, EdgeClientBuilder};
pub use emitter::{EventEmitter, EventSubscription};
pub use errors::{ClientError, FailureReason, RequestFailure};
pub use formatters::{Formatter, FormatterRegistry};
pub use registry::{
    PendingRequestRegistry, RequestHandle, RequestTimeouts, TIMEOUT_MAX_REQUEST_TIME,
    TIMEOUT_TO_FIRST_RESPONSE,
};
pub use worker::IngressWorker;
