//! Liveness tracking: heartbeats, the offline sweep and status recovery.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use fleet_control::CoreError;
use fleet_control::config::LivenessConfig;
use fleet_control::liveness::LivenessTracker;
use fleet_control::model::ServerStatus;
use fleet_control::store::{MemoryStore, NewServer, Store};

use crate::helpers::{register_server, test_hub};

fn tracker(store: Arc<MemoryStore>) -> LivenessTracker {
    LivenessTracker::new(
        LivenessConfig {
            sweep_interval_secs: 30,
            offline_threshold_secs: 60,
        },
        store,
    )
}

async fn add_server(store: &MemoryStore) -> u64 {
    store
        .create_server(NewServer {
            name: "web-1".into(),
            host: "10.0.0.1".into(),
            port: 22,
            ssh_user: "root".into(),
            ssh_key_id: None,
            created_by: 1,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn heartbeat_then_silence_goes_offline_and_recovers() {
    let store = Arc::new(MemoryStore::new());
    let tracker = tracker(store.clone());
    let server = add_server(&store).await;

    let t0 = Utc::now();
    tracker.heartbeat(server, t0, None).await.unwrap();
    assert_eq!(tracker.status_of(server), ServerStatus::Online);

    // Within the threshold: still online.
    assert_eq!(tracker.sweep(t0 + Duration::seconds(45)).await, 0);
    assert_eq!(tracker.status_of(server), ServerStatus::Online);

    // Past the threshold: offline, persisted too.
    assert_eq!(tracker.sweep(t0 + Duration::seconds(90)).await, 1);
    assert_eq!(tracker.status_of(server), ServerStatus::Offline);
    assert_eq!(
        store.get_server(server).await.unwrap().status,
        ServerStatus::Offline
    );

    // Repeated sweep is a no-op.
    assert_eq!(tracker.sweep(t0 + Duration::seconds(120)).await, 0);

    // A fresh heartbeat revives the server.
    tracker
        .heartbeat(server, t0 + Duration::seconds(150), None)
        .await
        .unwrap();
    assert_eq!(tracker.status_of(server), ServerStatus::Online);
}

#[tokio::test]
async fn heartbeat_for_unknown_server_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let tracker = tracker(store);

    let result = tracker.heartbeat(999, Utc::now(), None).await;
    assert!(matches!(result, Err(CoreError::NotFound("server", 999))));
    assert_eq!(tracker.status_of(999), ServerStatus::Unknown);
}

#[tokio::test]
async fn heartbeat_through_the_hub_updates_the_server_row() {
    let hub = test_hub(HashMap::new());
    let server = register_server(&hub, "web-1", None).await;

    assert_eq!(hub.server_liveness(server), ServerStatus::Unknown);

    let now = Utc::now();
    let mut os_info = fleet_control::model::JsonMap::new();
    os_info.insert("os".into(), serde_json::Value::String("linux".into()));
    hub.heartbeat(server, now, Some(os_info)).await.unwrap();

    assert_eq!(hub.server_liveness(server), ServerStatus::Online);

    let row = hub.get_server(server).await.unwrap();
    assert_eq!(row.status, ServerStatus::Online);
    assert_eq!(row.last_heartbeat, Some(now));
    assert_eq!(row.os_info["os"], "linux");
}
