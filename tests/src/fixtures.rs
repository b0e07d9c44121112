//! Shared fixtures: a client booted over the in-memory bus plus fake
//! remote nodes that sign (and decrypt) like real ones.

use edgelink_bus::{BusSubscription, BusTransport, InMemoryBus};
use edgelink_client::{EdgeClient, EdgeClientBuilder, RequestTimeouts};
use edgelink_crypto::{decrypt_from, sign_envelope, EdgeIdentity};
use edgelink_types::envelope::{EE_ENCRYPTED_DATA, EE_IS_ENCRYPTED, EE_PAYLOAD_PATH};
use edgelink_types::{
    ClientEvent, EdgeClientConfig, PayloadPath, StreamKind,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Initiator id used by every test client.
pub const INITIATOR: &str = "it-console";
/// Topic namespace used by every test client.
pub const TOPIC_ROOT: &str = "edgenet";

/// Default timeout for awaited events.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A booted client and the bus it lives on.
pub struct TestNet {
    pub bus: InMemoryBus,
    pub client: EdgeClient,
}

/// Boot a client over the in-memory bus with the in-process state
/// backend.
pub async fn boot_client(fleet: Vec<String>, timeouts: Option<RequestTimeouts>) -> TestNet {
    let config = EdgeClientConfig {
        initiator: Some(INITIATOR.to_string()),
        fleet,
        topic_root: TOPIC_ROOT.to_string(),
        ..Default::default()
    };

    let bus = InMemoryBus::new();
    let mut builder = EdgeClientBuilder::new(config).with_connector(Arc::new(bus.clone()));
    if let Some(timeouts) = timeouts {
        builder = builder.with_timeouts(timeouts);
    }
    let client = builder.boot().await.expect("client boots");

    TestNet { bus, client }
}

/// A remote node with its own identity.
pub struct FakeNode {
    pub identity: EdgeIdentity,
}

impl FakeNode {
    pub fn new() -> Self {
        Self {
            identity: EdgeIdentity::generate(),
        }
    }

    pub fn address(&self) -> edgelink_types::Address {
        self.identity.address()
    }

    /// Inbound topic of a stream as the client's workers subscribe it
    /// (share prefix stripped by the in-memory bus).
    pub fn inbound_topic(stream: StreamKind) -> String {
        format!("{INITIATOR}/{TOPIC_ROOT}/{}", stream.topic_suffix())
    }

    /// Sign and publish an envelope onto a stream.
    pub async fn send(&self, bus: &InMemoryBus, stream: StreamKind, path: &PayloadPath, body: Value) {
        let mut envelope = body.as_object().cloned().unwrap_or_default();
        envelope.insert(
            "EE_EVENT_TYPE".to_string(),
            json!(stream.event_type()),
        );
        envelope.insert(EE_PAYLOAD_PATH.to_string(), path.to_value());
        let signed = sign_envelope(&self.identity, envelope);
        bus.publish(
            &Self::inbound_topic(stream),
            serde_json::to_vec(&Value::Object(signed)).expect("serialize"),
        )
        .await
        .expect("publish");
    }

    /// Publish a pre-built (possibly tampered) envelope verbatim.
    pub async fn send_raw(&self, bus: &InMemoryBus, stream: StreamKind, envelope: Value) {
        bus.publish(
            &Self::inbound_topic(stream),
            serde_json::to_vec(&envelope).expect("serialize"),
        )
        .await
        .expect("publish");
    }

    /// Subscribe this node's command topic (`<root>/<address>/config`).
    pub async fn command_subscription(&self, bus: &InMemoryBus) -> BusSubscription {
        bus.subscribe(&format!("{TOPIC_ROOT}/{}/config", self.address()))
            .await
            .expect("subscribe")
    }

    /// Receive one command envelope, decrypting `EE_ENCRYPTED_DATA` when
    /// present. Returns the merged command object.
    pub async fn recv_command(
        &self,
        subscription: &mut BusSubscription,
        client_address: &edgelink_types::Address,
    ) -> Map<String, Value> {
        let frame = tokio::time::timeout(EVENT_TIMEOUT, subscription.recv())
            .await
            .expect("command arrives")
            .expect("stream open");
        let Value::Object(mut envelope) =
            serde_json::from_slice(&frame.payload).expect("command is JSON")
        else {
            panic!("command is not an object");
        };

        if envelope
            .get(EE_IS_ENCRYPTED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let blob = envelope
                .get(EE_ENCRYPTED_DATA)
                .and_then(Value::as_str)
                .expect("encrypted data present");
            let plain = decrypt_from(&self.identity, client_address, blob)
                .expect("command decrypts for the receiver");
            let Value::Object(inner) = serde_json::from_slice(&plain).expect("inner JSON") else {
                panic!("inner command is not an object");
            };
            for (key, value) in inner {
                envelope.insert(key, value);
            }
        }
        envelope
    }
}

impl Default for FakeNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Await the next event with a given name, skipping others.
pub async fn await_event(
    subscription: &mut edgelink_client::EventSubscription,
    name: &str,
) -> ClientEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let event = subscription.recv().await.expect("emitter alive");
            if event.name() == name {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("event {name} did not arrive"))
}

/// Assert that no event with the given name arrives within `window`.
pub async fn assert_no_event(
    subscription: &mut edgelink_client::EventSubscription,
    name: &str,
    window: Duration,
) {
    let outcome = tokio::time::timeout(window, async {
        loop {
            let event = subscription.recv().await.expect("emitter alive");
            if event.name() == name {
                return event;
            }
        }
    })
    .await;
    assert!(outcome.is_err(), "unexpected event {name}");
}
