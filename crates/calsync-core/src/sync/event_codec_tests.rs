//! Tests for event_codec module.

#[cfg(test)]
mod tests {
    use super::super::event_codec::*;
    use crate::model::{Event, SyncStatus};
    use crate::sync::remote::RemoteEvent;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, 20)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn event() -> Event {
        Event {
            id: "e1".to_string(),
            external_id: Some("R-1".to_string()),
            remote_calendar_id: Some("C1".to_string()),
            title: "Design review".to_string(),
            start_time: at(14),
            end_time: at(15),
            is_all_day: false,
            calendar_ids: vec!["C1".to_string()],
            tag_ids: vec!["work".to_string()],
            sync_status: SyncStatus::Pending,
            created_at: at(8),
            updated_at: at(9),
            local_version: 3,
            conflict_copy: None,
            last_sync_error: None,
        }
    }

    fn remote() -> RemoteEvent {
        RemoteEvent {
            remote_id: "R-1".to_string(),
            calendar_id: "C1".to_string(),
            title: "Design review (moved)".to_string(),
            start_time: at(16),
            end_time: at(17),
            is_all_day: false,
            last_modified: at(11),
            local_id: Some("e1".to_string()),
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let e = event();
        let snapshot = event_to_snapshot(&e).unwrap();
        assert_eq!(snapshot["title"], "Design review");
        assert_eq!(snapshot["start_time"], "2025-05-20T14:00:00");
        assert_eq!(snapshot["sync_status"], "pending");
        assert_eq!(snapshot_to_event(&snapshot).unwrap(), e);
    }

    #[test]
    fn test_snapshot_calendar_ids() {
        let snapshot = event_to_snapshot(&event()).unwrap();
        assert_eq!(snapshot_calendar_ids(&snapshot), Some(vec!["C1".to_string()]));
        assert_eq!(snapshot_calendar_ids(&serde_json::json!({"calendar_ids": []})), None);
        assert_eq!(snapshot_calendar_ids(&serde_json::json!({})), None);
    }

    #[test]
    fn test_delete_snapshot_keeps_remote_address() {
        let data = delete_snapshot(&event());
        assert_eq!(
            delete_target(&data),
            (Some("R-1".to_string()), Some("C1".to_string()))
        );
        assert_eq!(delete_target(&serde_json::json!({"id": "x"})), (None, None));
    }

    #[test]
    fn test_payload_carries_local_id() {
        let payload = event_to_payload(&event());
        assert_eq!(payload.local_id, "e1");
        assert_eq!(payload.start_time, at(14));
    }

    #[test]
    fn test_remote_onto_event_keeps_local_identity() {
        let merged = remote_onto_event(&remote(), &event());
        assert_eq!(merged.id, "e1");
        assert_eq!(merged.tag_ids, vec!["work".to_string()]);
        assert_eq!(merged.local_version, 3);
        assert_eq!(merged.title, "Design review (moved)");
        assert_eq!(merged.updated_at, at(11));
    }

    #[test]
    fn test_remote_to_new_event() {
        let created = remote_to_new_event(&remote(), "local-9".to_string(), at(12));
        assert_eq!(created.id, "local-9");
        assert_eq!(created.sync_status, SyncStatus::Synced);
        assert_eq!(created.calendar_ids, vec!["C1".to_string()]);
        assert_eq!(created.local_version, 0);
        assert_eq!(created.created_at, at(12));
    }

    #[test]
    fn test_snapshot_patch_keeps_identity_and_version() {
        let mut incoming = event();
        incoming.id = "other".to_string();
        incoming.title = "Moved remotely".to_string();
        incoming.end_time = at(17);
        incoming.local_version = 0;
        incoming.sync_status = SyncStatus::Synced;

        let mut e = event();
        e.last_sync_error = Some("old".to_string());
        snapshot_to_patch(&incoming).apply_to(&mut e);
        assert_eq!(e.id, "e1");
        assert_eq!(e.local_version, event().local_version);
        assert_eq!(e.title, "Moved remotely");
        assert_eq!(e.sync_status, SyncStatus::Synced);
        assert!(e.last_sync_error.is_none());
        assert_eq!(e.end_time, at(17));
    }
}
