//! Encoding/decoding between events, action snapshots and provider payloads.

use chrono::NaiveDateTime;

use crate::model::{Event, EventPatch, SyncStatus};
use crate::sync::remote::{RemoteEvent, RemotePayload};

// ============================================================================
// Action snapshots
// ============================================================================

/// Snapshot of an event stored in an action's `data`/`previous_data`.
pub fn event_to_snapshot(event: &Event) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(event)
}

/// Decode an action snapshot back into an event.
pub fn snapshot_to_event(data: &serde_json::Value) -> Result<Event, serde_json::Error> {
    serde_json::from_value(data.clone())
}

/// `calendar_ids` of a snapshot; `None` when absent or empty.
pub fn snapshot_calendar_ids(data: &serde_json::Value) -> Option<Vec<String>> {
    let ids: Vec<String> = data
        .get("calendar_ids")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

/// Data of a delete action: enough to address the remote copy after the local
/// row is gone.
pub fn delete_snapshot(event: &Event) -> serde_json::Value {
    serde_json::json!({
        "id": event.id,
        "external_id": event.external_id,
        "remote_calendar_id": event.remote_calendar_id,
        "calendar_ids": event.calendar_ids,
        "tag_ids": event.tag_ids,
    })
}

/// `(external_id, remote_calendar_id)` of a delete snapshot.
pub fn delete_target(data: &serde_json::Value) -> (Option<String>, Option<String>) {
    let field = |name: &str| data.get(name).and_then(|v| v.as_str()).map(str::to_string);
    (field("external_id"), field("remote_calendar_id"))
}

// ============================================================================
// Provider payloads
// ============================================================================

/// Content sent to the provider for an event.
pub fn event_to_payload(event: &Event) -> RemotePayload {
    RemotePayload {
        title: event.title.clone(),
        start_time: event.start_time,
        end_time: event.end_time,
        is_all_day: event.is_all_day,
        local_id: event.id.clone(),
    }
}

/// The remote version projected onto an existing local event.
///
/// Identity, mappings and bookkeeping come from `local`; content and the LWW
/// clock come from `remote`.
pub fn remote_onto_event(remote: &RemoteEvent, local: &Event) -> Event {
    Event {
        title: remote.title.clone(),
        start_time: remote.start_time,
        end_time: remote.end_time,
        is_all_day: remote.is_all_day,
        updated_at: remote.last_modified,
        external_id: Some(remote.remote_id.clone()),
        remote_calendar_id: Some(remote.calendar_id.clone()),
        ..local.clone()
    }
}

/// A brand-new local event for a remote event never seen before.
pub fn remote_to_new_event(remote: &RemoteEvent, id: String, now: NaiveDateTime) -> Event {
    Event {
        id,
        external_id: Some(remote.remote_id.clone()),
        remote_calendar_id: Some(remote.calendar_id.clone()),
        title: remote.title.clone(),
        start_time: remote.start_time,
        end_time: remote.end_time,
        is_all_day: remote.is_all_day,
        calendar_ids: vec![remote.calendar_id.clone()],
        tag_ids: Vec::new(),
        sync_status: SyncStatus::Synced,
        created_at: now,
        updated_at: remote.last_modified,
        local_version: 0,
        conflict_copy: None,
        last_sync_error: None,
    }
}

/// Patch writing a remote-sourced snapshot over an existing event.
///
/// Everything but identity, `local_version` and `created_at` comes from the
/// snapshot.
pub fn snapshot_to_patch(incoming: &Event) -> EventPatch {
    EventPatch {
        title: Some(incoming.title.clone()),
        start_time: Some(incoming.start_time),
        end_time: Some(incoming.end_time),
        is_all_day: Some(incoming.is_all_day),
        calendar_ids: Some(incoming.calendar_ids.clone()),
        tag_ids: Some(incoming.tag_ids.clone()),
        sync_status: Some(incoming.sync_status),
        external_id: incoming.external_id.clone(),
        remote_calendar_id: incoming.remote_calendar_id.clone(),
        conflict_copy: Some(incoming.conflict_copy.clone()),
        last_sync_error: Some(incoming.last_sync_error.clone()),
        updated_at: Some(incoming.updated_at),
    }
}
