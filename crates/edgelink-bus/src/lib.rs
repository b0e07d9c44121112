//! # Edgelink Bus
//!
//! The pub/sub seam between the client and the network broker.
//!
//! ## Architecture
//!
//! - [`BusTransport`] is the per-worker connection contract: one
//!   subscription, serial frame delivery, fire-and-forget publish.
//! - [`BusConnector`] mints transports; the client opens one per worker so
//!   shared subscriptions load-balance across the pool.
//! - [`MqttConnector`] speaks MQTT through rumqttc; [`InMemoryBus`] is the
//!   single-process implementation used by the test suites.
//! - [`TopicScheme`] owns topic composition; no other module builds topic
//!   strings.

pub mod memory;
pub mod mqtt;
pub mod topics;
pub mod transport;

pub use memory::InMemoryBus;
pub use mqtt::{MqttConnector, MqttTransport};
pub use topics::TopicScheme;
pub use transport::{
    BusConnector, BusError, BusFrame, BusSubscription, BusTransport, TransportStatus,
};
