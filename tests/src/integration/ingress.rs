//! Ingress invariants: secure drop, fleet filtering, universe tracking
//! and heartbeat state fan-out.

use crate::fixtures::{assert_no_event, await_event, boot_client, FakeNode};
use edgelink_crypto::sign_envelope;
use edgelink_types::envelope::EE_HASH;
use edgelink_types::{event_names, ClientEvent, PayloadPath, StreamKind, FLEET_WILDCARD};
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn invalid_signature_never_reaches_the_application() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let mut events = net.client.events();
    let node = FakeNode::new();
    let path = PayloadPath::node(node.address().as_str());

    // Tamper with the hash after signing.
    let mut envelope = json!({ "CPU": "ok" }).as_object().cloned().unwrap();
    envelope.insert(
        "EE_PAYLOAD_PATH".to_string(),
        path.to_value(),
    );
    let mut signed = sign_envelope(&node.identity, envelope);
    signed.insert(EE_HASH.to_string(), json!("0".repeat(64)));
    node.send_raw(&net.bus, StreamKind::Heartbeats, Value::Object(signed))
        .await;

    assert_no_event(
        &mut events,
        event_names::RECEIVED_HEARTBEAT_FROM_ADDRESS,
        Duration::from_millis(300),
    )
    .await;

    // The tampered envelope never entered the universe either: nothing
    // verified, nothing observed.
    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_reaches_application_and_state() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let mut events = net.client.events();
    let node = FakeNode::new();
    let path = PayloadPath::node(node.address().as_str());

    node.send(
        &net.bus,
        StreamKind::Heartbeats,
        &path,
        json!({
            "CONFIG_STREAMS": [ { "NAME": "video-1" } ],
            "ACTIVE_PLUGINS": [
                { "STREAM_ID": "video-1", "SIGNATURE": "OBJ_DET", "INSTANCE_ID": "i1" }
            ],
            "VERSION": "3.2",
        }),
    )
    .await;

    let event = await_event(&mut events, event_names::RECEIVED_HEARTBEAT_FROM_ADDRESS).await;
    let ClientEvent::HeartbeatFromAddress { address, message } = event else {
        panic!("wrong event variant");
    };
    assert_eq!(address, node.address());
    assert_eq!(message.data["VERSION"], json!("3.2"));

    // Heartbeat snapshot is stored under the address.
    let info = net
        .client
        .get_node_info(&node.address())
        .await
        .unwrap()
        .expect("snapshot stored");
    assert_eq!(info.data["VERSION"], json!("3.2"));

    // The sender entered the universe.
    let universe = net.client.get_universe().await.unwrap();
    assert!(universe.contains_key(node.address().as_str()));

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn fleet_filter_drops_foreign_nodes_but_universe_sees_them() {
    let tracked = FakeNode::new();
    let foreign = FakeNode::new();
    let net = boot_client(vec![tracked.address().as_str().to_string()], None).await;

    // Let the boot-time fleet registration land in the workers.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut events = net.client.events();

    foreign
        .send(
            &net.bus,
            StreamKind::Heartbeats,
            &PayloadPath::node(foreign.address().as_str()),
            json!({ "VERSION": "x" }),
        )
        .await;
    tracked
        .send(
            &net.bus,
            StreamKind::Heartbeats,
            &PayloadPath::node(tracked.address().as_str()),
            json!({ "VERSION": "y" }),
        )
        .await;

    // Only the tracked node surfaces as a heartbeat event.
    let event = await_event(&mut events, event_names::RECEIVED_HEARTBEAT_FROM_ADDRESS).await;
    let ClientEvent::HeartbeatFromAddress { address, .. } = event else {
        panic!("wrong event variant");
    };
    assert_eq!(address, tracked.address());
    assert_no_event(
        &mut events,
        event_names::RECEIVED_HEARTBEAT_FROM_ADDRESS,
        Duration::from_millis(300),
    )
    .await;

    // The universe still contains both.
    let universe = net.client.get_universe().await.unwrap();
    assert!(universe.contains_key(tracked.address().as_str()));
    assert!(universe.contains_key(foreign.address().as_str()));

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn notifications_and_payloads_surface_as_events() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let node = FakeNode::new();

    let mut notifications = net.client.subscribe(event_names::NOTIFICATION_RECEIVED);
    let mut payloads = net.client.subscribe("OBJ_DET");

    node.send(
        &net.bus,
        StreamKind::Notifications,
        &PayloadPath::pipeline(node.address().as_str(), "video-1"),
        json!({ "NOTIFICATION_CODE": "PIPELINE_OK", "NOTIFICATION": "deployed" }),
    )
    .await;
    node.send(
        &net.bus,
        StreamKind::Payloads,
        &PayloadPath::instance(node.address().as_str(), "video-1", "OBJ_DET", "i1"),
        json!({ "DETECTIONS": 3, "_P_VER": "1" }),
    )
    .await;

    let event = await_event(&mut notifications, event_names::NOTIFICATION_RECEIVED).await;
    let ClientEvent::Notification { record } = event else {
        panic!("wrong event variant");
    };
    assert_eq!(record.code.as_deref(), Some("PIPELINE_OK"));

    let event = await_event(&mut payloads, "OBJ_DET").await;
    let ClientEvent::Payload { message, .. } = event else {
        panic!("wrong event variant");
    };
    assert_eq!(message.data["DETECTIONS"], json!(3));
    assert_eq!(message.context.metadata["PLUGIN_META"]["_P_VER"], json!("1"));

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_is_idempotent_and_stops_ingress() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let node = FakeNode::new();

    net.client.shutdown().await.unwrap();
    net.client.shutdown().await.unwrap();

    // Publishing after shutdown is refused.
    let outcome = net
        .client
        .send_command(
            node.address().as_str(),
            edgelink_types::CommandAction::UpdateConfig,
            json!({ "NAME": "p" }),
        )
        .await;
    assert!(matches!(
        outcome,
        Err(edgelink_client::ClientError::ShuttingDown)
    ));
}
