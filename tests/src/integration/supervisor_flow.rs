//! Supervisor payloads: directory refresh, snapshot storage and the
//! online/offline edge signalling.

use crate::fixtures::{assert_no_event, await_event, boot_client, FakeNode};
use edgelink_client::supervisor::{ADMIN_PIPELINE, NETMON_SIGNATURE};
use edgelink_types::{event_names, ClientEvent, PayloadPath, StreamKind, FLEET_WILDCARD};
use serde_json::json;
use std::time::Duration;

fn supervisor_path(supervisor: &FakeNode) -> PayloadPath {
    PayloadPath::instance(
        supervisor.address().as_str(),
        ADMIN_PIPELINE,
        NETMON_SIGNATURE,
        "i1",
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn network_view_refreshes_the_directory() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let supervisor = FakeNode::new();
    let worker_node = FakeNode::new();

    let mut events = net.client.subscribe(event_names::SUPERVISOR_PAYLOAD);

    supervisor
        .send(
            &net.bus,
            StreamKind::Payloads,
            &supervisor_path(&supervisor),
            json!({
                "CURRENT_NETWORK": {
                    "gts-node-01": worker_node.address().as_str(),
                    "gts-sup-01": supervisor.address().as_str(),
                },
            }),
        )
        .await;

    await_event(&mut events, event_names::SUPERVISOR_PAYLOAD).await;
    // Give the directory refresh a beat to fan out.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        net.client.get_address("gts-node-01"),
        Some(worker_node.address())
    );
    assert_eq!(
        net.client.get_node_for_address(&supervisor.address()),
        Some("gts-sup-01".to_string())
    );

    // The supervisor snapshot is stored and indexed.
    let supervisors = net.client.get_network_supervisors().await.unwrap();
    assert_eq!(supervisors, vec![supervisor.address()]);
    let snapshot = net
        .client
        .get_network_snapshot(&supervisor.address())
        .await
        .unwrap()
        .expect("snapshot stored");
    assert_eq!(snapshot.name.as_deref(), Some("gts-sup-01"));

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn alert_transitions_emit_offline_then_online_once() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let supervisor = FakeNode::new();
    let node = FakeNode::new();

    let mut offline = net.client.subscribe(event_names::ENGINE_OFFLINE);
    let mut online = net.client.subscribe(event_names::ENGINE_ONLINE);

    let network = json!({
        "gts-node-01": node.address().as_str(),
    });

    // First view: node alerted → one ENGINE_OFFLINE.
    supervisor
        .send(
            &net.bus,
            StreamKind::Payloads,
            &supervisor_path(&supervisor),
            json!({
                "CURRENT_NETWORK": network,
                "IS_ALERT": true,
                "CURRENT_ALERTED": { "gts-node-01": "12:00" },
            }),
        )
        .await;

    let event = await_event(&mut offline, event_names::ENGINE_OFFLINE).await;
    let ClientEvent::EngineOffline { node: down, last_seen, .. } = event else {
        panic!("wrong event variant");
    };
    assert_eq!(down, "gts-node-01");
    assert_eq!(last_seen.as_deref(), Some("12:00"));

    // Same view again: still alerted, no duplicate event.
    supervisor
        .send(
            &net.bus,
            StreamKind::Payloads,
            &supervisor_path(&supervisor),
            json!({
                "CURRENT_NETWORK": network,
                "IS_ALERT": true,
                "CURRENT_ALERTED": { "gts-node-01": "12:01" },
            }),
        )
        .await;
    assert_no_event(
        &mut offline,
        event_names::ENGINE_OFFLINE,
        Duration::from_millis(300),
    )
    .await;

    // Recovery view: alert list empty → one ENGINE_ONLINE.
    supervisor
        .send(
            &net.bus,
            StreamKind::Payloads,
            &supervisor_path(&supervisor),
            json!({
                "CURRENT_NETWORK": network,
                "IS_ALERT": false,
                "CURRENT_ALERTED": {},
            }),
        )
        .await;

    let event = await_event(&mut online, event_names::ENGINE_ONLINE).await;
    let ClientEvent::EngineOnline { node: up, .. } = event else {
        panic!("wrong event variant");
    };
    assert_eq!(up, "gts-node-01");
    assert_no_event(
        &mut online,
        event_names::ENGINE_ONLINE,
        Duration::from_millis(300),
    )
    .await;

    net.client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn node_down_event_carries_last_seen() {
    let net = boot_client(vec![FLEET_WILDCARD.to_string()], None).await;
    let supervisor = FakeNode::new();

    let mut down_events = net.client.subscribe(event_names::NETWORK_NODE_DOWN);

    supervisor
        .send(
            &net.bus,
            StreamKind::Payloads,
            &supervisor_path(&supervisor),
            json!({
                "IS_ALERT": true,
                "CURRENT_ALERTED": { "gts-node-09": "11:58" },
            }),
        )
        .await;

    let event = await_event(&mut down_events, event_names::NETWORK_NODE_DOWN).await;
    let ClientEvent::NetworkNodeDown { nodes, supervisor: sup } = event else {
        panic!("wrong event variant");
    };
    assert_eq!(sup, supervisor.address());
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node, "gts-node-09");
    assert_eq!(nodes[0].last_seen.as_deref(), Some("11:58"));

    net.client.shutdown().await.unwrap();
}
