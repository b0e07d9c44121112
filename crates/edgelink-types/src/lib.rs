//! # Edgelink Types Crate
//!
//! Shared vocabulary for the edgelink client SDK: the 0xai envelope
//! constants, network addresses, payload paths, fleet membership, client
//! configuration, application events and the worker command/report messages.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every wire constant of the protocol is
//!   defined here, once.
//! - **Address-indexed**: state is keyed by [`Address`] end to end; human
//!   node names resolve only through the address directory.
//! - **Typed IPC**: the client and its ingress workers communicate
//!   exclusively through [`WorkerCommand`] and [`WorkerReport`] messages.

pub mod address;
pub mod commands;
pub mod config;
pub mod envelope;
pub mod events;
pub mod fleet;
pub mod ipc;

pub use address::{Address, AddressError, ADDRESS_PREFIX, LEGACY_ADDRESS_PREFIX};
pub use commands::{notification_codes, notification_types, CommandAction, NotificationRecord};
pub use config::{
    BlockchainConfig, BusConfig, EdgeClientConfig, ExternalCacheConfig, StateBackendKind,
    ThreadCounts,
};
pub use envelope::{PayloadPath, StreamKind};
pub use events::{event_names, ClientEvent};
pub use fleet::{FleetDelta, FleetSet, Target, FLEET_WILDCARD};
pub use ipc::{
    AddressBook, DownNode, MemoryReport, MessageContext, ProcessedMessage, WorkerCommand,
    WorkerId, WorkerReport,
};
