//! Watch multiplexing tests against an in-memory cluster

mod common;

use common::*;
use kubegate_api::kubernetes::{K8sError, WatchKey, WatchPhase, WatchSubscription};
use kubegate_common::{ResourceInstance, WatchFrame};
use std::collections::HashSet;
use std::time::Duration;

fn configmap_key() -> WatchKey {
    WatchKey {
        cluster: CLUSTER.to_string(),
        namespace: Some("default".to_string()),
        kind: "ConfigMap",
    }
}

async fn subscribe(gw: &TestGateway) -> WatchSubscription {
    gw.state
        .watches
        .subscribe(CLUSTER, "cm", Some("default"))
        .await
        .expect("subscribe")
}

fn snapshot_items(frame: WatchFrame) -> Vec<ResourceInstance> {
    match frame {
        WatchFrame::Snapshot { items, .. } => items,
        other => panic!("expected a snapshot, got {other:?}"),
    }
}

fn names(items: &[ResourceInstance]) -> HashSet<String> {
    items.iter().map(|i| i.name.clone()).collect()
}

/// Read frames until one mentions `name`, from either a snapshot or an event
async fn wait_for_object(subscription: &mut WatchSubscription, name: &str) -> WatchFrame {
    loop {
        let frame = next_frame(subscription).await;
        let seen = match &frame {
            WatchFrame::Snapshot { items, .. } => items.iter().any(|i| i.name == name),
            WatchFrame::Added { object } | WatchFrame::Modified { object } => object.name == name,
            WatchFrame::Error { message } => panic!("watch failed: {message}"),
            _ => false,
        };
        if seen {
            return frame;
        }
    }
}

#[tokio::test]
async fn test_first_frame_is_snapshot() {
    let gw = gateway().await;
    gw.cluster.seed(config_map("alpha", "1")).unwrap();
    gw.cluster.seed(config_map("beta", "1")).unwrap();

    let mut sub = subscribe(&gw).await;
    let frame = next_frame(&mut sub).await;
    let expected_rv = gw.cluster.current_revision().to_string();
    assert_eq!(frame.resource_version(), Some(expected_rv.as_str()));
    let items = snapshot_items(frame);

    assert_eq!(names(&items), HashSet::from(["alpha".to_string(), "beta".to_string()]));
    assert_eq!(gw.state.watches.phase(&configmap_key()), Some(WatchPhase::Streaming));
}

#[tokio::test]
async fn test_events_follow_snapshot() {
    let gw = gateway().await;
    let mut sub = subscribe(&gw).await;
    assert!(snapshot_items(next_frame(&mut sub).await).is_empty());

    gw.cluster.seed(config_map("alpha", "1")).unwrap();
    match next_frame(&mut sub).await {
        WatchFrame::Added { object } => {
            assert_eq!(object.name, "alpha");
            assert_eq!(object.kind, "ConfigMap");
        }
        other => panic!("expected ADDED, got {other:?}"),
    }
}

#[tokio::test]
async fn test_late_joiner_has_no_gap_or_duplicate() {
    let gw = gateway().await;
    let mut first = subscribe(&gw).await;
    snapshot_items(next_frame(&mut first).await);

    gw.cluster.seed(config_map("early", "1")).unwrap();
    wait_for_object(&mut first, "early").await;

    let mut late = subscribe(&gw).await;
    gw.cluster.seed(config_map("later", "1")).unwrap();

    let mut seen: Vec<String> = Vec::new();
    let mut baseline = None;
    while !seen.iter().any(|n| n == "later") {
        match next_frame(&mut late).await {
            WatchFrame::Snapshot {
                resource_version,
                items,
            } => {
                baseline = Some(resource_version);
                seen.extend(items.into_iter().map(|i| i.name));
            }
            WatchFrame::Added { object } => {
                assert!(baseline.is_some(), "event delivered before the snapshot");
                seen.push(object.name);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    assert!(seen.contains(&"early".to_string()));
    let unique: HashSet<_> = seen.iter().cloned().collect();
    assert_eq!(unique.len(), seen.len(), "duplicate delivery: {seen:?}");
    assert_eq!(gw.state.watches.active_channels(), 1);
    assert_eq!(gw.state.watches.subscriber_count(&configmap_key()), 2);
}

#[tokio::test]
async fn test_subscriber_disconnect_is_isolated() {
    let gw = gateway().await;
    let mut staying = subscribe(&gw).await;
    let mut leaving = subscribe(&gw).await;
    snapshot_items(next_frame(&mut staying).await);
    snapshot_items(next_frame(&mut leaving).await);

    drop(leaving);
    assert_eq!(gw.state.watches.subscriber_count(&configmap_key()), 1);

    gw.cluster.seed(config_map("after-drop", "1")).unwrap();
    wait_for_object(&mut staying, "after-drop").await;

    drop(staying);
    assert_eq!(gw.state.watches.active_channels(), 0);
    assert_eq!(gw.state.watches.phase(&configmap_key()), None);
}

#[tokio::test]
async fn test_slow_consumer_sees_dropped_marker() {
    let mut config = test_config();
    config.watch.subscriber_buffer = 2;
    let gw = gateway_with(config).await;

    let mut sub = subscribe(&gw).await;
    snapshot_items(next_frame(&mut sub).await);

    for i in 0..5 {
        gw.cluster.seed(config_map(&format!("cm-{i}"), "1")).unwrap();
    }
    let queued = &sub;
    let relayed = eventually(|| async move { queued.dropped() == 3 }, 100, 10).await;
    assert!(relayed, "expected three dropped frames, got {}", sub.dropped());

    assert_eq!(next_frame(&mut sub).await, WatchFrame::Dropped { count: 3 });
    match next_frame(&mut sub).await {
        WatchFrame::Added { object } => assert_eq!(object.name, "cm-3"),
        other => panic!("expected ADDED, got {other:?}"),
    }
    match next_frame(&mut sub).await {
        WatchFrame::Added { object } => assert_eq!(object.name, "cm-4"),
        other => panic!("expected ADDED, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reconnect_after_upstream_disconnect() {
    let gw = gateway().await;
    let mut sub = subscribe(&gw).await;
    snapshot_items(next_frame(&mut sub).await);

    gw.cluster.disconnect_watches();
    gw.cluster.seed(config_map("during-outage", "1")).unwrap();

    wait_for_object(&mut sub, "during-outage").await;
    let key = configmap_key();
    let (watches, key) = (&gw.state.watches, &key);
    let streaming = eventually(
        || async move { watches.phase(key) == Some(WatchPhase::Streaming) },
        100,
        10,
    )
    .await;
    assert!(streaming);
}

#[tokio::test]
async fn test_transient_unauthorized_recovers() {
    let gw = gateway().await;
    let mut sub = subscribe(&gw).await;
    snapshot_items(next_frame(&mut sub).await);

    gw.cluster
        .fail_next_watch(K8sError::Unauthorized("token has expired".to_string()));
    gw.cluster.disconnect_watches();
    gw.cluster.seed(config_map("after-rotation", "1")).unwrap();

    wait_for_object(&mut sub, "after-rotation").await;
    let key = configmap_key();
    let (watches, key) = (&gw.state.watches, &key);
    let streaming = eventually(
        || async move { watches.phase(key) == Some(WatchPhase::Streaming) },
        100,
        10,
    )
    .await;
    assert!(streaming);
    assert_eq!(gw.state.watches.active_channels(), 1);
}

#[tokio::test]
async fn test_persistent_unauthorized_exhausts_reconnects() {
    let gw = gateway().await;
    let mut sub = subscribe(&gw).await;
    snapshot_items(next_frame(&mut sub).await);

    for _ in 0..4 {
        gw.cluster
            .fail_next_watch(K8sError::Unauthorized("token revoked".to_string()));
    }
    gw.cluster.disconnect_watches();

    let message = loop {
        if let WatchFrame::Error { message } = next_frame(&mut sub).await {
            break message;
        }
    };
    assert!(message.contains("reconnect attempts"), "unexpected message: {message}");
    assert_eq!(gw.state.watches.active_channels(), 0);
}

#[tokio::test]
async fn test_removed_kind_fails_channel() {
    let gw = gateway().await;
    let mut sub = subscribe(&gw).await;
    snapshot_items(next_frame(&mut sub).await);

    gw.cluster.remove_kind("ConfigMap");

    let message = loop {
        if let WatchFrame::Error { message } = next_frame(&mut sub).await {
            break message;
        }
    };
    assert!(message.contains("no longer served"), "unexpected message: {message}");
    assert!(tokio::time::timeout(Duration::from_secs(1), sub.next())
        .await
        .expect("stream should end after the error frame")
        .is_none());
    assert_eq!(gw.state.watches.active_channels(), 0);
}

#[tokio::test]
async fn test_cluster_removal_terminates_watches() {
    let gw = gateway().await;
    let mut sub = subscribe(&gw).await;
    snapshot_items(next_frame(&mut sub).await);

    gw.state.registry.remove(CLUSTER).await.unwrap();

    let frame = next_frame(&mut sub).await;
    assert!(frame.is_terminal(), "expected an error frame, got {frame:?}");
    assert_eq!(gw.state.watches.active_channels(), 0);
}

#[tokio::test]
async fn test_subscribe_unknown_targets() {
    let gw = gateway().await;
    assert!(gw.state.watches.subscribe("staging", "Pod", None).await.is_err());
    assert!(gw.state.watches.subscribe(CLUSTER, "widgets", None).await.is_err());
    assert_eq!(gw.state.watches.active_channels(), 0);
}
