//! Full command/response transactions: publish → node decrypts → typed
//! notifications settle the pending request.

use crate::fixtures::{await_event, boot_client, FakeNode, EVENT_TIMEOUT};
use edgelink_client::{FailureReason, RequestTimeouts};
use edgelink_types::envelope::{ACTION, PAYLOAD, SESSION_ID};
use edgelink_types::notification_codes as codes;
use edgelink_types::notification_types;
use edgelink_types::{
    event_names, ClientEvent, CommandAction, PayloadPath, StreamKind, FLEET_WILDCARD,
};
use serde_json::{json, Value};
use std::time::Duration;

async fn reply(
    node: &FakeNode,
    bus: &edgelink_bus::InMemoryBus,
    path: &PayloadPath,
    session_id: &str,
    code: &str,
    kind: &str,
) {
    node.send(
        bus,
        StreamKind::Notifications,
        path,
        json!({
            "NOTIFICATION_CODE": code,
            "NOTIFICATION_TYPE": kind,
            SESSION_ID: session_id,
        }),
    )
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn single_watch_resolves_on_plugin_ok() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let node = FakeNode::new();
    let mut commands = node.command_subscription(&net.bus).await;

    let handle = net
        .client
        .send_command(
            node.address().as_str(),
            CommandAction::UpdatePipelineInstance,
            json!({
                "NAME": "video-1",
                "SIGNATURE": "OBJ_DET",
                "INSTANCE_ID": "i1",
                "INSTANCE_CONFIG": { "AI_ENGINE": "default" },
            }),
        )
        .await
        .expect("command published");

    // The node receives a signed, encrypted command and can read it.
    let command = node
        .recv_command(&mut commands, &net.client.address())
        .await;
    assert_eq!(
        command.get(ACTION).and_then(Value::as_str),
        Some("UPDATE_PIPELINE_INSTANCE")
    );
    assert!(command.get(PAYLOAD).is_some());
    let session = command
        .get(SESSION_ID)
        .and_then(Value::as_str)
        .expect("session stamped")
        .to_string();
    assert_eq!(session, handle.id());

    // Acknowledge on the watched path.
    let path = PayloadPath::instance(node.address().as_str(), "video-1", "OBJ_DET", "i1");
    reply(
        &node,
        &net.bus,
        &path,
        &session,
        codes::PLUGIN_OK,
        notification_types::NORMAL,
    )
    .await;

    let notifications = tokio::time::timeout(EVENT_TIMEOUT, handle.await_result())
        .await
        .expect("request settles")
        .expect("request resolves");
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].code.as_deref(),
        Some(codes::PLUGIN_OK)
    );

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_with_mixed_outcome_rejects_with_both_notifications() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let node = FakeNode::new();
    let mut commands = node.command_subscription(&net.bus).await;

    let handle = net
        .client
        .send_command(
            node.address().as_str(),
            CommandAction::BatchUpdatePipelineInstance,
            json!([
                { "NAME": "video-1", "SIGNATURE": "OBJ_DET", "INSTANCE_ID": "i1" },
                { "NAME": "video-1", "SIGNATURE": "OBJ_DET", "INSTANCE_ID": "i2" },
            ]),
        )
        .await
        .expect("command published");

    let command = node
        .recv_command(&mut commands, &net.client.address())
        .await;
    let session = command
        .get(SESSION_ID)
        .and_then(Value::as_str)
        .unwrap()
        .to_string();

    let p1 = PayloadPath::instance(node.address().as_str(), "video-1", "OBJ_DET", "i1");
    let p2 = PayloadPath::instance(node.address().as_str(), "video-1", "OBJ_DET", "i2");
    reply(&node, &net.bus, &p1, &session, codes::PLUGIN_OK, notification_types::NORMAL).await;
    reply(&node, &net.bus, &p2, &session, codes::PLUGIN_FAILED, notification_types::NORMAL).await;

    let failure = tokio::time::timeout(EVENT_TIMEOUT, handle.await_result())
        .await
        .expect("request settles")
        .expect_err("request rejects");
    assert_eq!(failure.reason, FailureReason::TargetsFailed);
    assert_eq!(failure.notifications.len(), 2);

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn exception_notification_rejects_before_completion() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let node = FakeNode::new();
    let mut commands = node.command_subscription(&net.bus).await;

    let handle = net
        .client
        .send_command(
            node.address().as_str(),
            CommandAction::BatchUpdatePipelineInstance,
            json!([
                { "NAME": "video-1", "SIGNATURE": "OBJ_DET", "INSTANCE_ID": "i1" },
                { "NAME": "video-1", "SIGNATURE": "OBJ_DET", "INSTANCE_ID": "i2" },
            ]),
        )
        .await
        .expect("command published");

    let command = node
        .recv_command(&mut commands, &net.client.address())
        .await;
    let session = command
        .get(SESSION_ID)
        .and_then(Value::as_str)
        .unwrap()
        .to_string();

    // One exception on one path rejects the whole request.
    let p1 = PayloadPath::instance(node.address().as_str(), "video-1", "OBJ_DET", "i1");
    reply(
        &node,
        &net.bus,
        &p1,
        &session,
        codes::PLUGIN_FAILED,
        notification_types::EXCEPTION,
    )
    .await;

    let failure = tokio::time::timeout(EVENT_TIMEOUT, handle.await_result())
        .await
        .expect("request settles")
        .expect_err("request rejects");
    assert_eq!(failure.reason, FailureReason::Exception);

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_node_times_out_with_synthetic_record() {
    let timeouts = RequestTimeouts {
        first_response: Duration::from_secs(60),
        completion: Duration::from_millis(400),
    };
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], Some(timeouts)).await;
    let node = FakeNode::new();

    let handle = net
        .client
        .send_command(
            node.address().as_str(),
            CommandAction::UpdateConfig,
            json!({ "NAME": "video-1" }),
        )
        .await
        .expect("command published");

    let failure = tokio::time::timeout(EVENT_TIMEOUT, handle.await_result())
        .await
        .expect("request settles")
        .expect_err("request times out");
    assert_eq!(failure.reason, FailureReason::Timeout);
    assert_eq!(failure.notifications.len(), 1);
    assert_eq!(failure.notifications[0].code.as_deref(), Some("TIMEOUT"));

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sticky_payload_is_delivered_exactly_once() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let node = FakeNode::new();

    let _handle = net
        .client
        .send_command(
            node.address().as_str(),
            CommandAction::UpdatePipelineInstance,
            json!({
                "NAME": "video-1",
                "SIGNATURE": "OBJ_DET",
                "INSTANCE_ID": "i1",
                "INSTANCE_CONFIG": {
                    "INSTANCE_COMMAND": { "__COMMAND_ID": "cmd-sticky-1" },
                },
            }),
        )
        .await
        .expect("command published");

    // Give the sticky watch a beat to reach the payload workers.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut payloads = net.client.subscribe("OBJ_DET");
    node.send(
        &net.bus,
        StreamKind::Payloads,
        &PayloadPath::instance(node.address().as_str(), "video-1", "OBJ_DET", "i1"),
        json!({
            "COMMAND_PARAMS": { "__COMMAND_ID": "cmd-sticky-1" },
            "RESULT": 42,
        }),
    )
    .await;

    let event = await_event(&mut payloads, "OBJ_DET").await;
    let ClientEvent::Payload { message, .. } = event else {
        panic!("wrong event variant");
    };
    assert_eq!(message.data["RESULT"], json!(42));

    // Exactly once: no duplicate delivery through the regular path.
    crate::fixtures::assert_no_event(&mut payloads, "OBJ_DET", Duration::from_millis(300)).await;

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolvable_receiver_is_rejected() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;

    let outcome = net
        .client
        .send_command(
            "gts-unknown-node",
            CommandAction::UpdateConfig,
            json!({ "NAME": "p" }),
        )
        .await;
    assert!(matches!(
        outcome,
        Err(edgelink_client::ClientError::ReceiverNotFound(_))
    ));

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_fails_outstanding_requests() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let node = FakeNode::new();

    let handle = net
        .client
        .send_command(
            node.address().as_str(),
            CommandAction::UpdateConfig,
            json!({ "NAME": "video-1" }),
        )
        .await
        .expect("command published");

    net.client.shutdown().await.unwrap();

    let failure = tokio::time::timeout(EVENT_TIMEOUT, handle.await_result())
        .await
        .expect("request settles")
        .expect_err("request fails on shutdown");
    assert_eq!(failure.reason, FailureReason::Shutdown);

    let event = net.client.subscribe(event_names::CLIENT_BOOTED);
    drop(event);
}
