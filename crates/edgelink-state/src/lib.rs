//! # Edgelink State
//!
//! The shared-state manager of the client: heartbeat snapshots, the
//! observed universe, supervisor network views, cross-process broadcast of
//! fleet/address/request-routing changes, and the process-addressable
//! inbox used for request-response routing.
//!
//! ## Two backends, one contract
//!
//! - [`InProcessState`]: local maps; broadcasts surface only as local
//!   events. Supports exactly one process.
//! - [`RedisState`]: TTL'd keys in an external cache plus pub/sub channels
//!   so peer processes observe fleet, address and routing changes.
//!
//! Reads never block and return empty on absence; read-modify-write on
//! shared keys goes through a short-TTL lock (external backend only).

pub mod directory;
pub mod errors;
pub mod in_process;
pub mod manager;
pub mod model;
pub mod redis_backend;

pub use directory::AddressDirectory;
pub use errors::StateError;
pub use in_process::InProcessState;
pub use manager::SharedState;
pub use model::{
    HeartbeatSnapshot, InboxMessage, NodeTime, PeerBroadcast, StateEvent, SupervisorSnapshot,
};
pub use redis_backend::RedisState;
