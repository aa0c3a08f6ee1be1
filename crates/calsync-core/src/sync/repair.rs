//! Maintenance pass healing inconsistencies between events and the action log.
//!
//! The scanner is idempotent and never deletes user data: it only fills in
//! missing calendar mappings, patches action snapshots, synthesizes actions
//! for orphaned pending events, retires actions whose event is gone and
//! collapses duplicate pending actions. A second run reports zero.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::action_log::{self, ActionLog};
use super::calendar_mapping::derive_calendar_ids_in;
use super::clock::Clock;
use super::event_codec::{event_to_snapshot, snapshot_calendar_ids};
use super::event_service::EventService;
use super::types::{ActionSource, ActionType, EntityType, NewAction};
use crate::error::StoreError;
use crate::model::{EventPatch, SyncStatus};
use crate::storage::event_store;
use crate::storage::Database;

/// Note recorded on a local create/update whose event no longer exists.
pub const NOTE_EVENT_GONE: &str = "event no longer exists";

/// Counts of what a repair pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Pending events whose empty `calendar_ids` were derived.
    pub calendars_derived: usize,
    /// Pending action snapshots given the event's `calendar_ids`.
    pub snapshots_patched: usize,
    /// Pending events without an action that got one synthesized.
    pub orphans_healed: usize,
    /// Entities whose duplicate pending actions were collapsed.
    pub duplicates_coalesced: usize,
    /// Local create/update actions retired because their event is gone.
    pub dangling_retired: usize,
}

impl RepairReport {
    pub fn total(&self) -> usize {
        self.calendars_derived
            + self.snapshots_patched
            + self.orphans_healed
            + self.duplicates_coalesced
            + self.dangling_retired
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }

    /// Human-readable one-line summary.
    pub fn message(&self) -> String {
        if self.is_clean() {
            return "Nothing to repair.".to_string();
        }
        format!(
            "Derived {} calendar mapping(s), patched {} snapshot(s), healed {} orphan(s), \
             coalesced {} duplicate(s), retired {} dangling action(s).",
            self.calendars_derived,
            self.snapshots_patched,
            self.orphans_healed,
            self.duplicates_coalesced,
            self.dangling_retired
        )
    }
}

/// Runs repair passes against one database.
#[derive(Clone)]
pub struct RepairScanner {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    service: EventService,
    log: ActionLog,
    default_calendar: Option<String>,
}

impl RepairScanner {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        service: EventService,
        log: ActionLog,
    ) -> Self {
        Self {
            db,
            clock,
            service,
            log,
            default_calendar: None,
        }
    }

    /// Calendar used when neither the event nor its tags name one.
    pub fn with_default_calendar(mut self, calendar_id: Option<String>) -> Self {
        self.default_calendar = calendar_id.filter(|c| !c.is_empty());
        self
    }

    pub fn run(&self) -> Result<RepairReport, StoreError> {
        let now = self.clock.now();
        let default_calendar = self.default_calendar.as_deref();

        let mut report = self.db.transaction(|conn| {
            let mut report = RepairReport::default();
            let mut pending = event_store::list_by_status_in(conn, SyncStatus::Pending)?;

            for event in pending.iter_mut().filter(|e| e.calendar_ids.is_empty()) {
                let derived = derive_calendar_ids_in(conn, &event.tag_ids, default_calendar)?;
                if derived.is_empty() {
                    continue;
                }
                tracing::debug!(event_id = %event.id, calendars = ?derived, "derived calendar mapping");
                let patch = EventPatch {
                    calendar_ids: Some(derived),
                    ..Default::default()
                };
                if let Ok(updated) = self.service.update_event_in(conn, &event.id, &patch, true)? {
                    *event = updated;
                    report.calendars_derived += 1;
                }
            }

            let calendars: HashMap<&str, &Vec<String>> = pending
                .iter()
                .filter(|e| !e.calendar_ids.is_empty())
                .map(|e| (e.id.as_str(), &e.calendar_ids))
                .collect();

            for action in action_log::list_pending_in(conn)? {
                if action.entity_type != EntityType::Event
                    || action.source != ActionSource::Local
                    || action.action_type == ActionType::Delete
                {
                    continue;
                }
                if event_store::get_in(conn, &action.entity_id)?.is_none() {
                    if !action.in_flight {
                        action_log::retire_with_note_in(conn, &action.id, NOTE_EVENT_GONE)?;
                        report.dangling_retired += 1;
                    }
                    continue;
                }
                if action.in_flight || snapshot_calendar_ids(&action.data).is_some() {
                    continue;
                }
                let Some(ids) = calendars.get(action.entity_id.as_str()) else {
                    continue;
                };
                let mut data = action.data.clone();
                if let Some(object) = data.as_object_mut() {
                    object.insert("calendar_ids".to_string(), serde_json::json!(ids));
                    action_log::patch_data_in(conn, &action.id, &data)?;
                    report.snapshots_patched += 1;
                }
            }

            for event in pending.iter().filter(|e| e.has_sync_target_hint()) {
                let has_action = action_log::open_for_entity_in(conn, &event.id)?
                    .iter()
                    .any(|a| a.source == ActionSource::Local);
                if has_action {
                    continue;
                }
                let action_type = if event.external_id.is_some() {
                    ActionType::Update
                } else {
                    ActionType::Create
                };
                let data = event_to_snapshot(event)
                    .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
                action_log::enqueue_in(
                    conn,
                    now,
                    &NewAction::local(action_type, EntityType::Event, &event.id, data, None),
                )?;
                tracing::info!(event_id = %event.id, "synthesized {} action for orphaned event", action_type.as_str());
                report.orphans_healed += 1;
            }

            Ok(report)
        })?;

        let mut entities: Vec<String> = self
            .log
            .list_pending()?
            .into_iter()
            .filter(|a| a.accepts_coalescing())
            .map(|a| a.entity_id)
            .collect();
        entities.sort();
        entities.dedup();
        for entity_id in entities {
            if self.log.coalesce(&entity_id)? {
                report.duplicates_coalesced += 1;
            }
        }

        if report.is_clean() {
            tracing::debug!("repair pass found nothing to fix");
        } else {
            tracing::info!(?report, "repair pass finished");
        }
        Ok(report)
    }
}
