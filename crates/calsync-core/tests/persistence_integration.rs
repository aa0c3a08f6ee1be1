//! Durability of the action log across process restarts.

mod common;

use std::sync::Arc;

use calsync_core::model::EventPatch;
use calsync_core::storage::database::KV_SYNC_IN_PROGRESS_SINCE;
use calsync_core::sync::SyncOptions;
use calsync_core::{Database, SyncStatus};
use common::{config, event_in, harness_with};
use tempfile::TempDir;

fn open(dir: &TempDir) -> Arc<Database> {
    Arc::new(Database::open_at(&dir.path().join("calsync.db")).unwrap())
}

#[tokio::test]
async fn test_pending_actions_survive_restart() {
    let dir = TempDir::new().unwrap();

    let (before, event_id) = {
        let h = harness_with(config(), open(&dir));
        h.engine.set_online(false);
        let service = h.engine.event_service();
        let event = service.create_event(event_in("C1", "offline")).unwrap();
        service
            .update_event(
                &event.id,
                EventPatch {
                    title: Some("offline, edited".into()),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        let other = service.create_event(event_in("C1", "second")).unwrap();
        service.delete_event(&other.id).unwrap();
        h.engine.perform_sync(SyncOptions::default()).await.unwrap();
        (h.engine.action_log().list_pending().unwrap(), event.id)
    };
    assert_eq!(before.len(), 1);

    let h = harness_with(config(), open(&dir));
    let after = h.engine.action_log().list_pending().unwrap();
    assert_eq!(after, before);

    let stored = h.engine.event_service().get_event_by_id(&event_id).unwrap().unwrap();
    assert_eq!(stored.title, "offline, edited");
    assert_eq!(stored.sync_status, SyncStatus::Pending);

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.applied, 1);
    assert_eq!(h.remote.events("C1")[0].title, "offline, edited");
}

#[tokio::test]
async fn test_interrupted_cycle_is_recovered_on_restart() {
    let dir = TempDir::new().unwrap();

    let action_id = {
        let h = harness_with(config(), open(&dir));
        let event = h
            .engine
            .event_service()
            .create_event(event_in("C1", "mid-flight"))
            .unwrap();
        let action = h.engine.action_log().open_for_entity(&event.id).unwrap().remove(0);
        // Simulate a process killed while the call was out
        assert!(h.engine.action_log().begin_dispatch(&action.id).unwrap());
        h.db.kv_set(KV_SYNC_IN_PROGRESS_SINCE, "2025-09-01T07:59:00+00:00")
            .unwrap();
        action.id
    };

    let h = harness_with(config(), open(&dir));
    assert!(h.engine.action_log().get(&action_id).unwrap().unwrap().in_flight);

    let since = h.engine.recover_interrupted_cycle().unwrap();
    assert!(since.is_some());
    assert!(!h.engine.action_log().get(&action_id).unwrap().unwrap().in_flight);
    assert_eq!(h.db.kv_get(KV_SYNC_IN_PROGRESS_SINCE).unwrap(), None);

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.applied, 1);
    assert!(h.engine.action_log().get(&action_id).unwrap().unwrap().synchronized);
}

#[tokio::test]
async fn test_last_sync_time_persists() {
    let dir = TempDir::new().unwrap();
    let first = {
        let h = harness_with(config(), open(&dir));
        h.engine.perform_sync(SyncOptions::default()).await.unwrap();
        h.engine.last_sync_time().unwrap()
    };
    assert!(first.is_some());

    let h = harness_with(config(), open(&dir));
    assert_eq!(h.engine.last_sync_time().unwrap(), first);
}
