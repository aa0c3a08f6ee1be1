//! Host-facing write path for events and tags.
//!
//! The event service is the only writer of local mutations. Each mutation and
//! its action are written in one transaction, then a
//! [`Notification::EventsUpdated`] is broadcast.

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::action_log::{self, NOTE_CANCELLED_BY_DELETE};
use super::clock::Clock;
use super::event_codec::{delete_snapshot, event_to_snapshot};
use super::types::{ActionId, ActionSource, ActionType, EntityType, NewAction};
use crate::error::{Result, StoreError, ValidationError};
use crate::events::Notification;
use crate::model::{ConflictChoice, Event, EventPatch, NewEvent, SyncStatus, Tag};
use crate::storage::event_store::{self, calendars_for_tags_in};
use crate::storage::Database;

const NOTIFY_CAPACITY: usize = 256;

fn snapshot(event: &Event) -> std::result::Result<serde_json::Value, StoreError> {
    event_to_snapshot(event).map_err(|e| StoreError::QueryFailed(e.to_string()))
}

fn validate_times(event: &Event) -> Result<()> {
    if event.end_time < event.start_time {
        return Err(ValidationError::InvalidTimeRange {
            start: event.start_time,
            end: event.end_time,
        }
        .into());
    }
    Ok(())
}

fn validate_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            message: "must not be empty".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Create, update and delete events and tags, recording the matching actions.
#[derive(Clone)]
pub struct EventService {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    notify: broadcast::Sender<Notification>,
}

impl EventService {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self { db, clock, notify }
    }

    /// Receive a [`Notification`] after every mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify.subscribe()
    }

    pub(crate) fn notifier(&self) -> broadcast::Sender<Notification> {
        self.notify.clone()
    }

    fn emit_events(&self, event_ids: Vec<String>, origin: ActionSource) {
        // No subscribers is fine
        let _ = self.notify.send(Notification::EventsUpdated {
            event_ids,
            origin,
            at: self.clock.now(),
        });
    }

    fn emit_tags(&self, tag_ids: Vec<String>) {
        let _ = self.notify.send(Notification::TagsUpdated {
            tag_ids,
            at: self.clock.now(),
        });
    }

    fn enqueue_local_in(
        &self,
        conn: &Connection,
        action: &NewAction,
    ) -> std::result::Result<ActionId, StoreError> {
        action_log::enqueue_in(conn, self.clock.now(), action)
    }

    /// Create an event.
    ///
    /// Empty `calendar_ids` are derived from the tags' calendar mappings. Unless
    /// the event is local-only, a `create` action is recorded with it.
    pub fn create_event(&self, input: NewEvent) -> Result<Event> {
        validate_non_empty("title", &input.title)?;
        let now = self.clock.local_now();
        let mut event = Event {
            id: Uuid::new_v4().to_string(),
            external_id: None,
            remote_calendar_id: None,
            title: input.title,
            start_time: input.start_time,
            end_time: input.end_time,
            is_all_day: input.is_all_day,
            calendar_ids: input.calendar_ids,
            tag_ids: input.tag_ids,
            sync_status: if input.local_only {
                SyncStatus::LocalOnly
            } else {
                SyncStatus::Pending
            },
            created_at: now,
            updated_at: now,
            local_version: 1,
            conflict_copy: None,
            last_sync_error: None,
        };
        validate_times(&event)?;

        let event = self.db.transaction(|conn| {
            if event.calendar_ids.is_empty() {
                event.calendar_ids = calendars_for_tags_in(conn, &event.tag_ids)?;
            }
            event_store::insert_in(conn, &event)?;
            if event.sync_status != SyncStatus::LocalOnly {
                self.enqueue_local_in(
                    conn,
                    &NewAction::local(
                        ActionType::Create,
                        EntityType::Event,
                        &event.id,
                        snapshot(&event)?,
                        None,
                    ),
                )?;
            }
            Ok(event)
        })?;

        tracing::debug!(event_id = %event.id, status = %event.sync_status, "created event");
        self.emit_events(vec![event.id.clone()], ActionSource::Local);
        Ok(event)
    }

    /// Apply a partial update.
    ///
    /// A local edit (`skip_sync = false`) bumps `local_version` and `updated_at`,
    /// marks the event pending and records an `update` action carrying the
    /// previous version as baseline. With `skip_sync = true` the patch is
    /// written as-is and no action is recorded; the sync engine uses this to
    /// persist remote-derived changes.
    pub fn update_event(&self, id: &str, patch: EventPatch, skip_sync: bool) -> Result<Event> {
        if let Some(title) = &patch.title {
            validate_non_empty("title", title)?;
        }
        let updated = self
            .db
            .transaction(|conn| self.update_event_in(conn, id, &patch, skip_sync))??;

        let origin = if skip_sync {
            ActionSource::Remote
        } else {
            ActionSource::Local
        };
        self.emit_events(vec![updated.id.clone()], origin);
        Ok(updated)
    }

    /// [`update_event`](Self::update_event) inside the caller's transaction,
    /// without notifying. The sync engine persists remote-derived changes
    /// through this with `skip_sync = true`.
    pub(crate) fn update_event_in(
        &self,
        conn: &Connection,
        id: &str,
        patch: &EventPatch,
        skip_sync: bool,
    ) -> std::result::Result<std::result::Result<Event, ValidationError>, StoreError> {
        let current = event_store::require_in(conn, id)?;
        let mut next = current.clone();
        patch.apply_to(&mut next);
        if next.end_time < next.start_time {
            return Ok(Err(ValidationError::InvalidTimeRange {
                start: next.start_time,
                end: next.end_time,
            }));
        }

        if !skip_sync {
            next.local_version = current.local_version + 1;
            if patch.updated_at.is_none() {
                next.updated_at = self.clock.local_now();
            }
            if patch.calendar_ids.is_none() && next.calendar_ids.is_empty() {
                next.calendar_ids = calendars_for_tags_in(conn, &next.tag_ids)?;
            }
            if patch.sync_status.is_none() {
                next.sync_status = match current.sync_status {
                    SyncStatus::LocalOnly => SyncStatus::LocalOnly,
                    SyncStatus::Conflict => SyncStatus::Conflict,
                    SyncStatus::Pending | SyncStatus::Synced | SyncStatus::Error => {
                        SyncStatus::Pending
                    }
                };
            }
            if next.sync_status == SyncStatus::Pending {
                next.last_sync_error = None;
            }
        }

        if next != current {
            event_store::replace_in(conn, &next)?;
        }

        if !skip_sync && next.sync_status != SyncStatus::LocalOnly {
            self.enqueue_local_in(
                conn,
                &NewAction::local(
                    ActionType::Update,
                    EntityType::Event,
                    &next.id,
                    snapshot(&next)?,
                    Some(snapshot(&current)?),
                ),
            )?;
        }
        Ok(Ok(next))
    }

    /// Delete an event. Returns `false` if it did not exist.
    ///
    /// A create that never reached the provider is cancelled and nothing is
    /// sent. Otherwise a `delete` action carrying the remote address is
    /// recorded.
    pub fn delete_event(&self, id: &str) -> Result<bool> {
        let deleted = self.db.transaction(|conn| {
            let Some(current) = event_store::get_in(conn, id)? else {
                return Ok(false);
            };
            event_store::delete_in(conn, id)?;
            if current.sync_status == SyncStatus::LocalOnly {
                return Ok(true);
            }

            let open = action_log::open_for_entity_in(conn, id)?;
            // An in-flight call may still create the remote copy
            let dispatching = open.iter().any(|a| a.in_flight);

            if current.external_id.is_none() && !dispatching {
                for action in open.iter().filter(|a| a.source == ActionSource::Local) {
                    action_log::retire_with_note_in(conn, &action.id, NOTE_CANCELLED_BY_DELETE)?;
                }
                tracing::debug!(event_id = id, "cancelled unsent create");
                return Ok(true);
            }

            self.enqueue_local_in(
                conn,
                &NewAction::local(
                    ActionType::Delete,
                    EntityType::Event,
                    id,
                    delete_snapshot(&current),
                    Some(snapshot(&current)?),
                ),
            )?;
            Ok(true)
        })?;

        if deleted {
            self.emit_events(vec![id.to_string()], ActionSource::Local);
        }
        Ok(deleted)
    }

    pub fn get_all_events(&self) -> Result<Vec<Event>> {
        Ok(self.db.with_conn(event_store::list_in)?)
    }

    pub fn get_event_by_id(&self, id: &str) -> Result<Option<Event>> {
        Ok(self.db.with_conn(|conn| event_store::get_in(conn, id))?)
    }

    /// Record an action for a mutation made outside this service.
    ///
    /// Returns `None` without recording anything when the event is local-only.
    pub fn record_local_action(
        &self,
        action_type: ActionType,
        entity_type: EntityType,
        entity_id: &str,
        data: serde_json::Value,
        previous_data: Option<serde_json::Value>,
    ) -> Result<Option<ActionId>> {
        let id = self.db.transaction(|conn| {
            if entity_type == EntityType::Event {
                if let Some(event) = event_store::get_in(conn, entity_id)? {
                    if event.sync_status == SyncStatus::LocalOnly {
                        return Ok(None);
                    }
                }
            }
            let action =
                NewAction::local(action_type, entity_type, entity_id, data, previous_data);
            self.enqueue_local_in(conn, &action).map(Some)
        })?;
        Ok(id)
    }

    /// Start syncing a local-only event.
    pub fn publish_event(&self, id: &str) -> Result<Event> {
        let now = self.clock.local_now();
        let published = self.db.transaction(|conn| {
            let mut event = event_store::require_in(conn, id)?;
            if event.sync_status != SyncStatus::LocalOnly {
                return Ok(Err(ValidationError::InvalidState {
                    id: id.to_string(),
                    message: format!("event is {}, not local-only", event.sync_status),
                }));
            }
            event.sync_status = SyncStatus::Pending;
            event.local_version += 1;
            event.updated_at = now;
            if event.calendar_ids.is_empty() {
                event.calendar_ids = calendars_for_tags_in(conn, &event.tag_ids)?;
            }
            event_store::replace_in(conn, &event)?;
            self.enqueue_local_in(
                conn,
                &NewAction::local(
                    ActionType::Create,
                    EntityType::Event,
                    id,
                    snapshot(&event)?,
                    None,
                ),
            )?;
            Ok(Ok(event))
        })??;

        self.emit_events(vec![published.id.clone()], ActionSource::Local);
        Ok(published)
    }

    /// Settle a flagged conflict.
    ///
    /// The chosen content becomes a fresh local edit, so it is pushed to the
    /// provider on the next cycle.
    pub fn resolve_conflict(&self, id: &str, choice: ConflictChoice) -> Result<Event> {
        let now = self.clock.local_now();
        let resolved = self.db.transaction(|conn| {
            let current = event_store::require_in(conn, id)?;
            let Some(copy) = current.conflict_copy.clone() else {
                return Ok(Err(ValidationError::InvalidState {
                    id: id.to_string(),
                    message: "event has no conflict to resolve".to_string(),
                }));
            };

            let mut next = current.clone();
            if choice == ConflictChoice::KeepPreserved {
                next.title = copy.title;
                next.start_time = copy.start_time;
                next.end_time = copy.end_time;
                next.is_all_day = copy.is_all_day;
            }
            next.conflict_copy = None;
            next.sync_status = SyncStatus::Pending;
            next.last_sync_error = None;
            next.local_version = current.local_version + 1;
            next.updated_at = now;
            event_store::replace_in(conn, &next)?;

            self.enqueue_local_in(
                conn,
                &NewAction::local(
                    ActionType::Update,
                    EntityType::Event,
                    id,
                    snapshot(&next)?,
                    Some(snapshot(&current)?),
                ),
            )?;
            Ok(Ok(next))
        })??;

        tracing::info!(event_id = id, ?choice, "conflict resolved");
        self.emit_events(vec![resolved.id.clone()], ActionSource::Local);
        Ok(resolved)
    }

    /// Insert an event first seen on the provider. No action is recorded.
    pub(crate) fn insert_remote_event_in(
        &self,
        conn: &Connection,
        event: &Event,
    ) -> std::result::Result<std::result::Result<(), ValidationError>, StoreError> {
        if event.end_time < event.start_time {
            return Ok(Err(ValidationError::InvalidTimeRange {
                start: event.start_time,
                end: event.end_time,
            }));
        }
        event_store::insert_in(conn, event)?;
        Ok(Ok(()))
    }

    /// Remove an event deleted on the provider. No action is recorded; open
    /// local actions of the event are retired as superseded.
    pub(crate) fn remove_remote_event_in(
        &self,
        conn: &Connection,
        id: &str,
        note: &str,
    ) -> std::result::Result<bool, StoreError> {
        let removed = event_store::delete_in(conn, id)?;
        for open in action_log::open_for_entity_in(conn, id)? {
            if open.source == ActionSource::Local && !open.in_flight {
                action_log::retire_with_note_in(conn, &open.id, note)?;
            }
        }
        Ok(removed)
    }

    /// Create or replace a tag.
    ///
    /// Tags are not mirrored remotely; the recorded action only keeps the log
    /// complete and is retired by the next cycle.
    pub fn upsert_tag(&self, tag: Tag) -> Result<Tag> {
        validate_non_empty("name", &tag.name)?;
        self.db.transaction(|conn| {
            let previous = event_store::get_tag_in(conn, &tag.id)?;
            event_store::upsert_tag_in(conn, &tag)?;
            let to_value = |t: &Tag| {
                serde_json::to_value(t).map_err(|e| StoreError::QueryFailed(e.to_string()))
            };
            let action_type = if previous.is_some() {
                ActionType::Update
            } else {
                ActionType::Create
            };
            self.enqueue_local_in(
                conn,
                &NewAction::local(
                    action_type,
                    EntityType::Tag,
                    &tag.id,
                    to_value(&tag)?,
                    previous.as_ref().map(to_value).transpose()?,
                ),
            )?;
            Ok(())
        })?;
        self.emit_tags(vec![tag.id.clone()]);
        Ok(tag)
    }

    /// Delete a tag. Events keep the tag id; it simply stops mapping anywhere.
    pub fn delete_tag(&self, id: &str) -> Result<bool> {
        let deleted = self.db.transaction(|conn| {
            let Some(previous) = event_store::get_tag_in(conn, id)? else {
                return Ok(false);
            };
            event_store::delete_tag_in(conn, id)?;
            let data = serde_json::to_value(&previous)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            self.enqueue_local_in(
                conn,
                &NewAction::local(ActionType::Delete, EntityType::Tag, id, data.clone(), Some(data)),
            )?;
            Ok(true)
        })?;
        if deleted {
            self.emit_tags(vec![id.to_string()]);
        }
        Ok(deleted)
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        Ok(self.db.with_conn(event_store::list_tags_in)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::sync::action_log::ActionLog;
    use crate::sync::clock::ManualClock;
    use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 2, 3)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn setup() -> (EventService, ActionLog, Arc<ManualClock>) {
        let db = Arc::new(Database::open_memory().unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap(),
        ));
        let service = EventService::new(db.clone(), clock.clone());
        let log = ActionLog::new(db, clock.clone());
        service
            .upsert_tag(Tag {
                id: "work".into(),
                name: "Work".into(),
                calendar_id: Some("C1".into()),
            })
            .unwrap();
        (service, log, clock)
    }

    fn new_event(title: &str) -> NewEvent {
        NewEvent {
            title: title.into(),
            start_time: at(9),
            end_time: at(10),
            tag_ids: vec!["work".into()],
            ..Default::default()
        }
    }

    fn event_actions(log: &ActionLog, id: &str) -> Vec<crate::sync::types::Action> {
        log.list_pending()
            .unwrap()
            .into_iter()
            .filter(|a| a.entity_id == id)
            .collect()
    }

    #[test]
    fn create_derives_calendars_and_records_create() {
        let (service, log, _clock) = setup();
        let event = service.create_event(new_event("Standup")).unwrap();

        assert_eq!(event.calendar_ids, vec!["C1".to_string()]);
        assert_eq!(event.sync_status, SyncStatus::Pending);
        assert_eq!(event.local_version, 1);

        let actions = event_actions(&log, &event.id);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::Create);
        assert_eq!(actions[0].data["title"], "Standup");
    }

    #[test]
    fn local_only_event_records_nothing_until_published() {
        let (service, log, _clock) = setup();
        let mut input = new_event("Timer");
        input.local_only = true;
        let event = service.create_event(input).unwrap();
        assert_eq!(event.sync_status, SyncStatus::LocalOnly);
        assert!(event_actions(&log, &event.id).is_empty());

        service
            .update_event(
                &event.id,
                EventPatch {
                    title: Some("Timer 2".into()),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        assert!(event_actions(&log, &event.id).is_empty());
        assert_eq!(
            service
                .record_local_action(
                    ActionType::Update,
                    EntityType::Event,
                    &event.id,
                    serde_json::json!({}),
                    None
                )
                .unwrap(),
            None
        );

        let published = service.publish_event(&event.id).unwrap();
        assert_eq!(published.sync_status, SyncStatus::Pending);
        let actions = event_actions(&log, &event.id);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::Create);
        assert!(service.publish_event(&event.id).is_err());
    }

    #[test]
    fn update_bumps_version_and_coalesces() {
        let (service, log, clock) = setup();
        let event = service.create_event(new_event("Standup")).unwrap();
        for title in ["A", "B", "C"] {
            clock.advance(chrono::Duration::seconds(1));
            service
                .update_event(
                    &event.id,
                    EventPatch {
                        title: Some(title.into()),
                        ..Default::default()
                    },
                    false,
                )
                .unwrap();
        }

        let stored = service.get_event_by_id(&event.id).unwrap().unwrap();
        assert_eq!(stored.local_version, 4);
        assert_eq!(stored.updated_at.format("%H:%M:%S").to_string(), "08:00:03");

        let actions = event_actions(&log, &event.id);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::Create);
        assert_eq!(actions[0].data["title"], "C");
    }

    #[test]
    fn skip_sync_update_records_nothing() {
        let (service, log, _clock) = setup();
        let event = service.create_event(new_event("Standup")).unwrap();
        let action = &event_actions(&log, &event.id)[0];
        log.mark_synchronized(&action.id).unwrap();

        let updated = service
            .update_event(
                &event.id,
                EventPatch {
                    sync_status: Some(SyncStatus::Synced),
                    external_id: Some("R-1".into()),
                    ..Default::default()
                },
                true,
            )
            .unwrap();
        assert_eq!(updated.local_version, 1);
        assert_eq!(updated.sync_status, SyncStatus::Synced);
        assert!(event_actions(&log, &event.id).is_empty());
    }

    #[test]
    fn invalid_range_is_rejected_without_writing() {
        let (service, log, _clock) = setup();
        let event = service.create_event(new_event("Standup")).unwrap();
        let err = service
            .update_event(
                &event.id,
                EventPatch {
                    end_time: Some(at(8)),
                    ..Default::default()
                },
                false,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::InvalidTimeRange { .. })
        ));
        let stored = service.get_event_by_id(&event.id).unwrap().unwrap();
        assert_eq!(stored.end_time, at(10));
        assert_eq!(event_actions(&log, &event.id).len(), 1);

        let mut bad = new_event("Backwards");
        bad.end_time = at(7);
        assert!(service.create_event(bad).is_err());
        assert!(service.create_event(new_event("  ")).is_err());
    }

    #[test]
    fn delete_before_sync_cancels_create() {
        let (service, log, _clock) = setup();
        let event = service.create_event(new_event("Oops")).unwrap();
        let create_id = event_actions(&log, &event.id)[0].id.clone();

        assert!(service.delete_event(&event.id).unwrap());
        assert!(event_actions(&log, &event.id).is_empty());
        let create = log.get(&create_id).unwrap().unwrap();
        assert!(create.synchronized);
        assert_eq!(create.last_error.as_deref(), Some(NOTE_CANCELLED_BY_DELETE));
        assert!(!service.delete_event(&event.id).unwrap());
    }

    #[test]
    fn delete_after_sync_records_remote_address() {
        let (service, log, _clock) = setup();
        let event = service.create_event(new_event("Synced")).unwrap();
        log.mark_synchronized(&event_actions(&log, &event.id)[0].id)
            .unwrap();
        service
            .update_event(
                &event.id,
                EventPatch {
                    external_id: Some("R-9".into()),
                    remote_calendar_id: Some("C1".into()),
                    sync_status: Some(SyncStatus::Synced),
                    ..Default::default()
                },
                true,
            )
            .unwrap();

        service.delete_event(&event.id).unwrap();
        let actions = event_actions(&log, &event.id);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::Delete);
        assert_eq!(actions[0].data["external_id"], "R-9");
        assert_eq!(actions[0].data["remote_calendar_id"], "C1");
    }

    #[test]
    fn resolve_conflict_restores_preserved_copy() {
        let (service, log, _clock) = setup();
        let event = service.create_event(new_event("Mine")).unwrap();
        log.mark_synchronized(&event_actions(&log, &event.id)[0].id)
            .unwrap();

        let mut copy = event.to_conflict_copy(crate::model::Side::Remote);
        copy.title = "Theirs".into();
        service
            .update_event(
                &event.id,
                EventPatch {
                    sync_status: Some(SyncStatus::Conflict),
                    conflict_copy: Some(Some(copy)),
                    ..Default::default()
                },
                true,
            )
            .unwrap();

        let resolved = service
            .resolve_conflict(&event.id, ConflictChoice::KeepPreserved)
            .unwrap();
        assert_eq!(resolved.title, "Theirs");
        assert_eq!(resolved.sync_status, SyncStatus::Pending);
        assert!(resolved.conflict_copy.is_none());
        assert_eq!(event_actions(&log, &event.id).len(), 1);

        assert!(service
            .resolve_conflict(&event.id, ConflictChoice::KeepCurrent)
            .is_err());
    }

    #[test]
    fn mutations_notify_subscribers() {
        let (service, _log, _clock) = setup();
        let mut rx = service.subscribe();
        let event = service.create_event(new_event("Ping")).unwrap();
        service.delete_event(&event.id).unwrap();

        for _ in 0..2 {
            match rx.try_recv().unwrap() {
                Notification::EventsUpdated { event_ids, .. } => {
                    assert_eq!(event_ids, vec![event.id.clone()])
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn tag_operations() {
        let (service, log, _clock) = setup();
        service
            .upsert_tag(Tag {
                id: "home".into(),
                name: "Home".into(),
                calendar_id: None,
            })
            .unwrap();
        assert_eq!(service.list_tags().unwrap().len(), 2);
        assert!(service.delete_tag("home").unwrap());
        assert!(!service.delete_tag("home").unwrap());

        let tag_actions: Vec<_> = log
            .list_pending()
            .unwrap()
            .into_iter()
            .filter(|a| a.entity_type == EntityType::Tag)
            .collect();
        // The delete supersedes the pending home create
        assert_eq!(tag_actions.len(), 2);
        assert_eq!(tag_actions[0].entity_id, "work");
        assert_eq!(tag_actions[1].entity_id, "home");
        assert_eq!(tag_actions[1].action_type, ActionType::Delete);
    }
}
