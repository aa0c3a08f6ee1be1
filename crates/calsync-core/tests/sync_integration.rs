//! End-to-end sync cycles against the in-memory provider.

mod common;

use std::time::Duration as StdDuration;

use calsync_core::model::{ConflictChoice, EventPatch, Side, SyncStatus};
use calsync_core::sync::{
    ActionSource, ActionType, Clock, RemoteCall, RemoteError, RemotePayload, SyncOptions,
};
use chrono::Duration;
use common::{at, event_in, harness, harness_with, tagged, work_tag};

fn force() -> SyncOptions {
    SyncOptions {
        pull: true,
        force_retry: true,
    }
}

#[tokio::test]
async fn test_offline_create_then_sync_then_delete() {
    let h = harness();
    let service = h.engine.event_service();
    service.upsert_tag(work_tag()).unwrap();

    h.engine.set_online(false);
    let e1 = service.create_event(tagged("work", "E1")).unwrap();
    assert_eq!(e1.calendar_ids, vec!["C1".to_string()]);
    assert_eq!(e1.sync_status, SyncStatus::Pending);

    let offline = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(offline.applied, 0);
    assert!(h.remote.calls().is_empty());

    h.engine.set_online(true);
    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.applied, 1);
    assert_eq!(result.failed, 0);
    assert!(result.errors.is_empty());

    let synced = service.get_event_by_id(&e1.id).unwrap().unwrap();
    assert_eq!(synced.sync_status, SyncStatus::Synced);
    let remote_id = synced.external_id.clone().unwrap();
    assert_eq!(synced.remote_calendar_id.as_deref(), Some("C1"));
    assert_eq!(h.remote.get("C1", &remote_id).unwrap().title, "E1");

    assert!(service.delete_event(&e1.id).unwrap());
    let open = h.engine.action_log().open_for_entity(&e1.id).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].action_type, ActionType::Delete);
    assert_eq!(open[0].data["external_id"], remote_id.as_str());

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.applied, 1);
    assert!(h.engine.action_log().open_for_entity(&e1.id).unwrap().is_empty());
    assert!(h.remote.events("C1").is_empty());
    assert!(service.get_event_by_id(&e1.id).unwrap().is_none());
}

#[tokio::test]
async fn test_rapid_updates_send_one_create_with_latest_content() {
    let h = harness();
    let service = h.engine.event_service();
    let event = service.create_event(event_in("C1", "draft")).unwrap();
    for title in ["one", "two", "three"] {
        service
            .update_event(
                &event.id,
                EventPatch {
                    title: Some(title.to_string()),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
    }

    // The burst folds into the unsent create as it is recorded
    let pending = h.engine.action_log().list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].action_type, ActionType::Create);
    assert_eq!(pending[0].data["title"], "three");

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.applied, 1);
    let writes = h.remote.write_calls();
    assert_eq!(writes.len(), 1);
    assert!(matches!(writes[0], RemoteCall::Create { .. }));
    assert_eq!(h.remote.events("C1")[0].title, "three");
}

#[tokio::test]
async fn test_transient_failure_backs_off_then_succeeds() {
    let h = harness();
    let event = h
        .engine
        .event_service()
        .create_event(event_in("C1", "retry me"))
        .unwrap();
    h.remote.fail_next(RemoteError::Server {
        status: 503,
        message: "unavailable".into(),
    });

    let first = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(first.failed, 1);
    assert!(!first.errors[0].terminal);
    let action = &h.engine.action_log().open_for_entity(&event.id).unwrap()[0];
    assert_eq!(action.retry_count, 1);
    assert!(action.last_error.as_deref().unwrap().contains("503"));

    // Gate not passed yet
    let early = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(early.applied, 0);
    assert_eq!(early.failed, 0);

    h.clock.advance(Duration::seconds(5));
    let later = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(later.applied, 1);
    let stored = h.engine.event_service().get_event_by_id(&event.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_rate_limit_hint_extends_backoff() {
    let h = harness();
    let event = h
        .engine
        .event_service()
        .create_event(event_in("C1", "throttled"))
        .unwrap();
    h.remote.fail_next(RemoteError::RateLimited {
        retry_after: Some(StdDuration::from_secs(90)),
    });
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();

    h.clock.advance(Duration::seconds(30));
    assert_eq!(
        h.engine.perform_sync(SyncOptions::default()).await.unwrap().applied,
        0
    );
    h.clock.advance(Duration::seconds(60));
    assert_eq!(
        h.engine.perform_sync(SyncOptions::default()).await.unwrap().applied,
        1
    );
    assert!(h
        .engine
        .action_log()
        .open_for_entity(&event.id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_terminal_failure_marks_event_error() {
    let h = harness();
    let mut notifications = h.engine.event_service().subscribe();
    let event = h
        .engine
        .event_service()
        .create_event(event_in("C1", "bad"))
        .unwrap();
    h.remote.fail_next(RemoteError::Rejected {
        status: 400,
        message: "malformed".into(),
    });

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].terminal);
    assert_eq!(result.errors[0].entity_id.as_deref(), Some(event.id.as_str()));

    let stored = h.engine.event_service().get_event_by_id(&event.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Error);
    assert!(stored.last_sync_error.unwrap().contains("malformed"));
    assert!(h.engine.action_log().list_pending().unwrap().is_empty());
    assert_eq!(h.engine.action_log().stats().unwrap().failed, 1);

    let mut saw_failure = false;
    while let Ok(n) = notifications.try_recv() {
        if matches!(n, calsync_core::Notification::SyncFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn test_retry_ceiling_is_terminal() {
    let mut config = common::config();
    config.sync.max_retries = 2;
    let h = harness_with(
        config,
        std::sync::Arc::new(calsync_core::Database::open_memory().unwrap()),
    );
    let event = h
        .engine
        .event_service()
        .create_event(event_in("C1", "flaky"))
        .unwrap();

    h.remote.set_online(false);
    let first = h.engine.perform_sync(force()).await.unwrap();
    assert!(!first.errors[0].terminal);
    let second = h.engine.perform_sync(force()).await.unwrap();
    assert!(second.errors[0].terminal);

    let stored = h.engine.event_service().get_event_by_id(&event.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Error);
    assert!(h.engine.action_log().list_pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_update_of_missing_remote_event_is_terminal() {
    let h = harness();
    let service = h.engine.event_service();
    let event = service.create_event(event_in("C1", "gone soon")).unwrap();
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    let remote_id = service
        .get_event_by_id(&event.id)
        .unwrap()
        .unwrap()
        .external_id
        .unwrap();

    h.remote.fail_next(RemoteError::NotFound);
    service
        .update_event(
            &event.id,
            EventPatch {
                title: Some("edited".into()),
                ..Default::default()
            },
            false,
        )
        .unwrap();
    let result = h
        .engine
        .perform_sync(SyncOptions {
            pull: false,
            force_retry: false,
        })
        .await
        .unwrap();
    assert!(result.errors[0].terminal);
    assert!(h.remote.get("C1", &remote_id).is_some());
    assert_eq!(
        service.get_event_by_id(&event.id).unwrap().unwrap().sync_status,
        SyncStatus::Error
    );
}

#[tokio::test]
async fn test_unmapped_event_waits_for_mapping() {
    let h = harness();
    let service = h.engine.event_service();
    let event = service.create_event(tagged("work", "unmapped")).unwrap();
    assert!(event.calendar_ids.is_empty());

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.skipped, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(
        service.get_event_by_id(&event.id).unwrap().unwrap().sync_status,
        SyncStatus::Pending
    );

    service.upsert_tag(work_tag()).unwrap();
    let report = h.engine.repair().unwrap();
    assert_eq!(report.calendars_derived, 1);

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.applied, 1);
    assert_eq!(h.remote.events("C1").len(), 1);
    assert!(h.engine.repair().unwrap().is_clean());
}

#[tokio::test]
async fn test_delete_before_sync_sends_nothing() {
    let h = harness();
    let service = h.engine.event_service();
    let event = service.create_event(event_in("C1", "never sent")).unwrap();
    service.delete_event(&event.id).unwrap();

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.applied, 0);
    assert!(h.remote.write_calls().is_empty());
    assert!(h.engine.action_log().list_pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_local_only_event_stays_local_until_published() {
    let h = harness();
    let service = h.engine.event_service();
    let mut input = event_in("C1", "private");
    input.local_only = true;
    let event = service.create_event(input).unwrap();
    assert!(h.engine.action_log().list_pending().unwrap().is_empty());

    h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert!(h.remote.write_calls().is_empty());

    service.publish_event(&event.id).unwrap();
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(h.remote.events("C1").len(), 1);
}

#[tokio::test]
async fn test_remote_changes_flow_into_store() {
    let h = harness();
    let service = h.engine.event_service();
    let remote_id = h.remote.remote_insert(
        "C1",
        &RemotePayload {
            title: "from phone".into(),
            start_time: at(3, 9),
            end_time: at(3, 10),
            is_all_day: false,
            local_id: String::new(),
        },
    );

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.pulled, 1);
    let events = service.get_all_events().unwrap();
    assert_eq!(events.len(), 1);
    let local = &events[0];
    assert_eq!(local.title, "from phone");
    assert_eq!(local.external_id.as_deref(), Some(remote_id.as_str()));
    assert_eq!(local.calendar_ids, vec!["C1".to_string()]);
    assert_eq!(local.sync_status, SyncStatus::Synced);

    // Remote-derived writes never echo back
    assert!(h.remote.write_calls().is_empty());
    assert!(h
        .engine
        .action_log()
        .list_pending()
        .unwrap()
        .iter()
        .all(|a| a.source == ActionSource::Remote));

    h.clock.advance(Duration::minutes(5));
    h.remote
        .remote_edit("C1", &remote_id, "moved", h.clock.now().naive_utc())
        .unwrap();
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(service.get_event_by_id(&local.id).unwrap().unwrap().title, "moved");

    h.remote.remote_delete("C1", &remote_id);
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert!(service.get_all_events().unwrap().is_empty());
    assert!(h.remote.write_calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_edits_flag_conflict_and_resolve() {
    let h = harness();
    let service = h.engine.event_service();
    let event = service.create_event(event_in("C1", "original")).unwrap();
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    let remote_id = service
        .get_event_by_id(&event.id)
        .unwrap()
        .unwrap()
        .external_id
        .unwrap();

    h.clock.advance(Duration::seconds(10));
    service
        .update_event(
            &event.id,
            EventPatch {
                title: Some("mine".into()),
                ..Default::default()
            },
            false,
        )
        .unwrap();
    h.clock.advance(Duration::seconds(10));
    h.remote
        .remote_edit("C1", &remote_id, "theirs", h.clock.now().naive_utc())
        .unwrap();
    // Keep the local update from reaching the provider first
    h.remote.fail_next(RemoteError::Timeout(StdDuration::from_secs(15)));

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.conflicts, 1);

    let flagged = service.get_event_by_id(&event.id).unwrap().unwrap();
    assert_eq!(flagged.sync_status, SyncStatus::Conflict);
    assert_eq!(flagged.title, "theirs");
    let copy = flagged.conflict_copy.clone().unwrap();
    assert_eq!(copy.origin, Side::Local);
    assert_eq!(copy.title, "mine");

    // Conflicted events are not pushed
    let held = h.engine.perform_sync(force()).await.unwrap();
    assert_eq!(held.skipped, 1);
    assert_eq!(h.remote.get("C1", &remote_id).unwrap().title, "theirs");

    let resolved = service
        .resolve_conflict(&event.id, ConflictChoice::KeepPreserved)
        .unwrap();
    assert_eq!(resolved.title, "mine");
    assert!(resolved.conflict_copy.is_none());

    h.engine.perform_sync(force()).await.unwrap();
    assert_eq!(h.remote.get("C1", &remote_id).unwrap().title, "mine");
    let settled = service.get_event_by_id(&event.id).unwrap().unwrap();
    assert_eq!(settled.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_newer_local_version_is_pushed_back() {
    let h = harness();
    let service = h.engine.event_service();
    let event = service.create_event(event_in("C1", "keep me")).unwrap();
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    let remote_id = service
        .get_event_by_id(&event.id)
        .unwrap()
        .unwrap()
        .external_id
        .unwrap();

    // A stale remote modification, older than the local version
    let stale = h.clock.now().naive_utc() - Duration::hours(1);
    h.remote.remote_edit("C1", &remote_id, "stale", stale).unwrap();

    h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(service.get_event_by_id(&event.id).unwrap().unwrap().title, "keep me");

    h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(h.remote.get("C1", &remote_id).unwrap().title, "keep me");
    assert_eq!(
        service.get_event_by_id(&event.id).unwrap().unwrap().sync_status,
        SyncStatus::Synced
    );
}

#[tokio::test]
async fn test_convergence_after_reconnection() {
    let h = harness();
    let service = h.engine.event_service();
    h.engine.set_online(false);

    let a = service.create_event(event_in("C1", "a")).unwrap();
    let b = service.create_event(event_in("C1", "b")).unwrap();
    let c = service.create_event(event_in("C1", "c")).unwrap();
    service
        .update_event(
            &a.id,
            EventPatch {
                title: Some("a2".into()),
                ..Default::default()
            },
            false,
        )
        .unwrap();
    service.delete_event(&c.id).unwrap();
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();

    h.engine.set_online(true);
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();

    let mut remote_titles: Vec<String> =
        h.remote.events("C1").into_iter().map(|e| e.title).collect();
    remote_titles.sort();
    assert_eq!(remote_titles, vec!["a2".to_string(), "b".to_string()]);
    for id in [&a.id, &b.id] {
        let stored = service.get_event_by_id(id).unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
    }
    assert!(h.engine.action_log().list_pending().unwrap().is_empty());

    // A converged system stays quiet
    let writes = h.remote.write_calls().len();
    let idle = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(idle.applied, 0);
    assert_eq!(h.remote.write_calls().len(), writes);
}

#[tokio::test]
async fn test_only_one_cycle_runs_at_a_time() {
    let h = harness();
    h.engine
        .event_service()
        .create_event(event_in("C1", "slow"))
        .unwrap();
    h.remote.set_latency(Some(StdDuration::from_millis(50)));

    let (first, second) = tokio::join!(
        h.engine.perform_sync(SyncOptions::default()),
        h.engine.perform_sync(SyncOptions::default())
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(first.already_running ^ second.already_running);
    assert_eq!(first.applied + second.applied, 1);
    assert_eq!(h.remote.max_concurrent_calls(), 1);
    assert_eq!(h.remote.write_calls().len(), 1);
    assert!(!h.engine.is_sync_in_progress());
}

#[tokio::test]
async fn test_going_offline_aborts_in_flight_call() {
    let h = harness();
    let event = h
        .engine
        .event_service()
        .create_event(event_in("C1", "interrupted"))
        .unwrap();
    h.remote.set_latency(Some(StdDuration::from_millis(200)));

    let engine = h.engine.clone();
    let cycle = tokio::spawn(async move { engine.perform_sync(SyncOptions::default()).await });
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    h.engine.set_online(false);

    let result = cycle.await.unwrap().unwrap();
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].message.contains("Offline"));
    let action = &h.engine.action_log().open_for_entity(&event.id).unwrap()[0];
    assert!(!action.in_flight);
    assert_eq!(action.retry_count, 1);
}

#[tokio::test]
async fn test_lost_create_response_is_not_sent_twice() {
    let h = harness();
    let service = h.engine.event_service();
    let event = service.create_event(event_in("C1", "once")).unwrap();
    h.remote
        .lose_next_response(RemoteError::Timeout(StdDuration::from_secs(30)));

    let first = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.pulled, 1);
    let landed = h.remote.events("C1");
    assert_eq!(landed.len(), 1);

    // The echo carries our id, so the landed copy is adopted
    let adopted = service.get_event_by_id(&event.id).unwrap().unwrap();
    assert_eq!(adopted.external_id.as_deref(), Some(landed[0].remote_id.as_str()));
    assert_eq!(adopted.remote_calendar_id.as_deref(), Some("C1"));
    assert_eq!(adopted.sync_status, SyncStatus::Pending);

    let retried = h.engine.perform_sync(force()).await.unwrap();
    assert_eq!(retried.applied, 1);
    assert_eq!(h.remote.events("C1").len(), 1);
    let writes = h.remote.write_calls();
    assert_eq!(writes.len(), 2);
    assert!(matches!(writes[0], RemoteCall::Create { .. }));
    assert!(matches!(writes[1], RemoteCall::Update { .. }));

    let settled = service.get_event_by_id(&event.id).unwrap().unwrap();
    assert_eq!(settled.sync_status, SyncStatus::Synced);
    assert!(h.engine.action_log().list_pending().unwrap().is_empty());
}

fn phone_payload(title: &str) -> RemotePayload {
    RemotePayload {
        title: title.into(),
        start_time: at(3, 9),
        end_time: at(3, 10),
        is_all_day: false,
        local_id: String::new(),
    }
}

#[tokio::test]
async fn test_insert_then_edit_in_one_pull_yields_one_event() {
    let h = harness();
    let service = h.engine.event_service();
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();

    let remote_id = h.remote.remote_insert("C1", &phone_payload("from phone"));
    h.clock.advance(Duration::minutes(1));
    h.remote
        .remote_edit("C1", &remote_id, "from phone, renamed", h.clock.now().naive_utc())
        .unwrap();

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.pulled, 2);
    let events = service.get_all_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].title, "from phone, renamed");
    assert_eq!(events[0].external_id.as_deref(), Some(remote_id.as_str()));
    assert!(h.engine.action_log().list_pending().unwrap().is_empty());
    assert!(h.remote.write_calls().is_empty());
}

#[tokio::test]
async fn test_insert_then_remove_in_one_pull_leaves_nothing() {
    let h = harness();
    let service = h.engine.event_service();
    h.engine.perform_sync(SyncOptions::default()).await.unwrap();

    let remote_id = h.remote.remote_insert("C1", &phone_payload("short-lived"));
    assert!(h.remote.remote_delete("C1", &remote_id));

    let result = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(result.pulled, 2);
    assert!(service.get_all_events().unwrap().is_empty());
    assert!(h.engine.action_log().list_pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_later_success_clears_earlier_terminal_error() {
    let h = harness();
    let service = h.engine.event_service();
    let log = h.engine.action_log();
    let event = service.create_event(event_in("C1", "first")).unwrap();
    let create_id = log.open_for_entity(&event.id).unwrap()[0].id.clone();

    // Edit while the create is claimed, so it queues separately
    assert!(log.begin_dispatch(&create_id).unwrap());
    service
        .update_event(
            &event.id,
            EventPatch {
                title: Some("second".into()),
                ..Default::default()
            },
            false,
        )
        .unwrap();
    log.release(&create_id).unwrap();
    assert_eq!(log.open_for_entity(&event.id).unwrap().len(), 2);

    h.remote.fail_next(RemoteError::Rejected {
        status: 400,
        message: "malformed".into(),
    });
    let first = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.skipped, 1);
    let failed = service.get_event_by_id(&event.id).unwrap().unwrap();
    assert_eq!(failed.sync_status, SyncStatus::Error);

    let second = h.engine.perform_sync(SyncOptions::default()).await.unwrap();
    assert_eq!(second.applied, 1);
    let recovered = service.get_event_by_id(&event.id).unwrap().unwrap();
    assert_eq!(recovered.sync_status, SyncStatus::Synced);
    assert!(recovered.last_sync_error.is_none());
    assert_eq!(h.remote.events("C1")[0].title, "second");
}
