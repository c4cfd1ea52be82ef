//! Contract Test: Pruning
//!
//! Verifies removal of devices unseen for longer than the retention window.
//!
//! Constraints verified:
//! - Devices last seen more than 30 days ago are removed from memory and registry
//! - Devices seen within 30 days are retained
//! - Registry entities with no last-seen record at all are removed
//! - A failing removal does not stop the others and is retried next cycle

mod common;

use chrono::Duration;
use common::*;
use std::sync::Arc;
use wrtsync_core::traits::TrackedEntity;
use wrtsync_core::{SyncEngine, SyncEvent};

const OLD: &str = "11:11:11:11:11:31";
const RECENT: &str = "22:22:22:22:22:29";
const UNKNOWN: &str = "33:33:33:33:33:33";
const LOCKED: &str = "44:44:44:44:44:44";

async fn seeded_store() -> RecordingStateStore {
    let store = RecordingStateStore::new();
    store
        .seed(
            "home_last_seen",
            serde_json::json!({
                OLD: {"last_seen": (t0() - Duration::days(31)).to_rfc3339()},
                RECENT: {"last_seen": (t0() - Duration::days(29)).to_rfc3339()},
                LOCKED: {"last_seen": (t0() - Duration::days(45)).to_rfc3339()},
            }),
        )
        .await;
    store
}

fn registry() -> Arc<FailingRegistry> {
    Arc::new(FailingRegistry::with_entities([
        TrackedEntity::device_tracker(OLD, true),
        TrackedEntity::device_tracker(RECENT, true),
        TrackedEntity::device_tracker(UNKNOWN, false),
        TrackedEntity::device_tracker(LOCKED, true),
    ]))
}

#[tokio::test]
async fn stale_devices_pruned_recent_retained() {
    let store = seeded_store().await;
    let registry = registry();

    let (mut engine, mut event_rx) = SyncEngine::new(
        Box::new(ScriptedSession::new()),
        Box::new(store),
        registry.clone(),
        minimal_config("home"),
    )
    .unwrap();

    engine.run_cycle_at(t0(), day("2025-01-09")).await;

    assert!(!registry.contains(OLD));
    assert!(!registry.contains(UNKNOWN));
    assert!(!registry.contains(LOCKED));
    assert!(registry.contains(RECENT));

    assert!(engine.presence().last_seen(OLD).is_none());
    assert!(engine.presence().last_seen(RECENT).is_some());

    let pruned: Vec<String> = drain(&mut event_rx)
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::DevicesPruned { macs } => Some(macs),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(pruned, vec![OLD, UNKNOWN, LOCKED]);
}

#[tokio::test]
async fn failed_removal_isolated_and_retried() {
    let store = seeded_store().await;
    let registry = registry();
    registry.fail_removal_of(LOCKED);

    let (mut engine, _event_rx) = SyncEngine::new(
        Box::new(ScriptedSession::new()),
        Box::new(RecordingStateStore::sharing_counters_with(&store)),
        registry.clone(),
        minimal_config("home"),
    )
    .unwrap();

    engine.run_cycle_at(t0(), day("2025-01-09")).await;

    assert!(registry.contains(LOCKED), "failed removal leaves the entity");
    assert!(!registry.contains(OLD), "other removals still happen");
    assert!(!registry.contains(UNKNOWN));
    assert!(
        engine.presence().last_seen(LOCKED).is_some(),
        "kept in memory for the retry"
    );

    let doc = store.document("home_last_seen").await.unwrap();
    assert!(doc.get(LOCKED).is_some());
    assert!(doc.get(OLD).is_none());

    registry.clear_failures();
    engine
        .run_cycle_at(t0() + Duration::seconds(30), day("2025-01-09"))
        .await;

    assert!(!registry.contains(LOCKED));
    assert!(engine.presence().last_seen(LOCKED).is_none());
}

#[tokio::test]
async fn connected_devices_never_pruned() {
    let store = RecordingStateStore::new();
    store
        .seed(
            "home_last_seen",
            serde_json::json!({
                "AA:BB:CC:DD:EE:FF": {"last_seen": (t0() - Duration::days(90)).to_rfc3339()}
            }),
        )
        .await;
    let registry = Arc::new(FailingRegistry::with_entities([
        TrackedEntity::device_tracker("AA:BB:CC:DD:EE:FF", true),
    ]));

    let (mut engine, _event_rx) = SyncEngine::new(
        Box::new(ScriptedSession::new()),
        Box::new(store),
        registry.clone(),
        minimal_config("home"),
    )
    .unwrap();

    engine.run_cycle_at(t0(), day("2025-01-09")).await;
    assert!(registry.contains("AA:BB:CC:DD:EE:FF"));
    assert_eq!(engine.presence().last_seen("AA:BB:CC:DD:EE:FF"), Some(t0()));
}
