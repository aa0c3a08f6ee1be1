//! One sync cycle: drain the action log, push local changes, pull and
//! reconcile remote changes.
//!
//! Phases run `Idle → Draining → Applying → Reconciling → Idle`. At most one
//! cycle runs at a time; the [`CycleGuard`] releases the slot on every exit
//! path, including panics and a dropped future.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use uuid::Uuid;

use super::action_log::{self, ActionLog};
use super::calendar_mapping::{derive_calendar_ids_in, resolve_target_calendar_in};
use super::clock::Clock;
use super::conflict_resolver::resolve;
use super::event_codec::{
    delete_target, event_to_payload, event_to_snapshot, remote_to_new_event, snapshot_calendar_ids,
    snapshot_to_event, snapshot_to_patch,
};
use super::event_service::EventService;
use super::remote::{PullWindow, RemoteCalendar, RemoteChange, RemoteError, RemoteEvent};
use super::repair::NOTE_EVENT_GONE;
use super::types::{
    Action, ActionSource, ActionType, EntityType, FailureOutcome, NewAction, SyncFailure,
    SyncOptions, SyncPhase, SyncResult,
};
use crate::error::{Result, StoreError};
use crate::events::Notification;
use crate::model::{Event, EventPatch, Side, SyncStatus};
use crate::storage::database::{cursor_key, KV_LAST_SYNC_AT, KV_SYNC_IN_PROGRESS_SINCE};
use crate::storage::event_store;
use crate::storage::{Database, SyncConfig};

const NOTE_TAG_NOT_MIRRORED: &str = "tags are not mirrored remotely";
const NOTE_LOCAL_ONLY: &str = "event is local-only";
const NOTE_NOTHING_REMOTE: &str = "nothing to delete remotely";
const NOTE_SUPERSEDED_BY_REMOTE: &str = "superseded by remote change";

/// Cycle state shared between the orchestrator and the engine facade.
#[derive(Default)]
pub struct CycleState {
    running: AtomicBool,
    phase: Mutex<SyncPhase>,
    since: Mutex<Option<DateTime<Utc>>>,
}

impl CycleState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.lock().map(|p| *p).unwrap_or_default()
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since.lock().ok().and_then(|s| *s)
    }

    fn set_phase(&self, phase: SyncPhase) {
        if let Ok(mut current) = self.phase.lock() {
            if *current != phase {
                tracing::debug!(from = ?*current, to = ?phase, "sync phase");
            }
            *current = phase;
        }
    }

    fn set_since(&self, since: Option<DateTime<Utc>>) {
        if let Ok(mut current) = self.since.lock() {
            *current = since;
        }
    }
}

/// Holds the single cycle slot; persisted as `sync_in_progress_since` so an
/// interrupted process is detected on the next start.
struct CycleGuard<'a> {
    state: &'a CycleState,
    db: &'a Database,
}

impl<'a> CycleGuard<'a> {
    fn acquire(
        state: &'a CycleState,
        db: &'a Database,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<Self>, StoreError> {
        if state
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }
        let guard = Self { state, db };
        state.set_since(Some(now));
        db.kv_set(KV_SYNC_IN_PROGRESS_SINCE, &now.to_rfc3339())?;
        Ok(Some(guard))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.state.set_phase(SyncPhase::Idle);
        self.state.set_since(None);
        if let Err(e) = self.db.kv_delete(KV_SYNC_IN_PROGRESS_SINCE) {
            tracing::warn!("failed to clear in-progress marker: {e}");
        }
        self.state.running.store(false, Ordering::SeqCst);
    }
}

/// Outcome of dispatching one action.
enum Dispatch {
    Applied,
    /// Left pending without an attempt.
    Skipped,
    /// Retired without a remote effect.
    Retired,
    Failed(RemoteError),
}

/// Resolve once `rx` holds `value`; never resolves if the sender is gone.
async fn wait_for_value(mut rx: watch::Receiver<bool>, value: bool) {
    loop {
        if *rx.borrow_and_update() == value {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn store_err(e: serde_json::Error) -> StoreError {
    StoreError::QueryFailed(e.to_string())
}

/// Drives sync cycles against one remote provider.
pub struct Orchestrator {
    db: Arc<Database>,
    log: ActionLog,
    service: EventService,
    remote: Arc<dyn RemoteCalendar>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    pull_calendars: Vec<String>,
    state: Arc<CycleState>,
    online: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
    notify: broadcast::Sender<Notification>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        log: ActionLog,
        service: EventService,
        remote: Arc<dyn RemoteCalendar>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        pull_calendars: Vec<String>,
        state: Arc<CycleState>,
        online: watch::Receiver<bool>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let notify = service.notifier();
        Self {
            db,
            log,
            service,
            remote,
            clock,
            config,
            pull_calendars,
            state,
            online,
            shutdown,
            notify,
        }
    }

    pub fn state(&self) -> &Arc<CycleState> {
        &self.state
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn emit(&self, notification: Notification) {
        let _ = self.notify.send(notification);
    }

    fn emit_events(&self, event_ids: Vec<String>, origin: ActionSource) {
        self.emit(Notification::EventsUpdated {
            event_ids,
            origin,
            at: self.clock.now(),
        });
    }

    /// Run one remote call under the per-call timeout, aborted by going
    /// offline or by shutdown.
    async fn call<T>(
        &self,
        fut: impl Future<Output = std::result::Result<T, RemoteError>>,
    ) -> std::result::Result<T, RemoteError> {
        if !self.is_online() {
            return Err(RemoteError::Offline);
        }
        let timeout = self.config.remote_timeout();
        tokio::select! {
            res = tokio::time::timeout(timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(RemoteError::Timeout(timeout)),
            },
            _ = wait_for_value(self.online.clone(), false) => Err(RemoteError::Offline),
            _ = wait_for_value(self.shutdown.clone(), true) => Err(RemoteError::Cancelled),
        }
    }

    /// Run a full cycle. Returns immediately with `already_running` if another
    /// cycle holds the slot.
    pub async fn perform(&self, options: SyncOptions) -> Result<SyncResult> {
        let started_at = self.clock.now();
        let Some(_guard) = CycleGuard::acquire(&self.state, &self.db, started_at)? else {
            tracing::debug!("sync already in progress");
            return Ok(SyncResult::already_running());
        };

        self.emit(Notification::SyncStarted { at: started_at });
        let deadline = Instant::now() + self.config.cycle_budget();
        let mut result = SyncResult {
            started_at: Some(started_at),
            ..Default::default()
        };

        self.state.set_phase(SyncPhase::Draining);
        let due = self.drain(options)?;
        tracing::debug!(due = due.len(), "drained action log");

        self.state.set_phase(SyncPhase::Applying);
        self.apply_all(due, deadline, &mut result).await?;

        if options.pull && self.is_online() && !self.is_shut_down() {
            self.state.set_phase(SyncPhase::Reconciling);
            self.reconcile(deadline, &mut result).await?;
        }

        let compacted = self.log.compact(self.config.max_retired_actions)?;
        if compacted > 0 {
            tracing::debug!(compacted, "compacted retired actions");
        }

        let finished_at = self.clock.now();
        self.db.kv_set(KV_LAST_SYNC_AT, &finished_at.to_rfc3339())?;
        result.finished_at = Some(finished_at);

        self.emit(Notification::SyncFinished {
            applied: result.applied,
            failed: result.failed,
            skipped: result.skipped,
            pulled: result.pulled,
            conflicts: result.conflicts,
            at: finished_at,
        });
        tracing::info!(
            applied = result.applied,
            failed = result.failed,
            skipped = result.skipped,
            deferred = result.deferred,
            pulled = result.pulled,
            conflicts = result.conflicts,
            "sync cycle finished"
        );
        Ok(result)
    }

    /// Collapse duplicate local actions, then collect everything due.
    fn drain(&self, options: SyncOptions) -> Result<Vec<Action>> {
        let pending = self.log.list_pending()?;
        let mut entities: Vec<&str> = pending
            .iter()
            .filter(|a| a.accepts_coalescing())
            .map(|a| a.entity_id.as_str())
            .collect();
        entities.sort_unstable();
        entities.dedup();
        let mut collapsed = false;
        for entity_id in entities {
            collapsed |= self.log.coalesce(entity_id)?;
        }

        let pending = if collapsed {
            self.log.list_pending()?
        } else {
            pending
        };
        let now = self.clock.now();
        Ok(pending
            .into_iter()
            .filter(|a| {
                if options.force_retry {
                    !a.in_flight
                } else {
                    a.is_due(now)
                }
            })
            .collect())
    }

    /// Dispatch actions in order until done, out of budget, offline or shut down.
    async fn apply_all(
        &self,
        actions: Vec<Action>,
        deadline: Instant,
        result: &mut SyncResult,
    ) -> Result<()> {
        // An entity whose earlier action did not complete keeps its later ones queued
        let mut blocked: HashSet<String> = HashSet::new();
        let total = actions.len();

        for (idx, action) in actions.into_iter().enumerate() {
            let needs_remote = action.source == ActionSource::Local
                && action.entity_type == EntityType::Event;
            if self.is_shut_down()
                || Instant::now() >= deadline
                || (needs_remote && !self.is_online())
            {
                let remaining = total - idx;
                tracing::debug!(remaining, "deferring remaining actions to next cycle");
                result.deferred += remaining;
                break;
            }
            if blocked.contains(&action.entity_id) {
                result.skipped += 1;
                continue;
            }
            if !self.log.begin_dispatch(&action.id)? {
                continue;
            }

            let outcome = match self.dispatch(&action).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Store failure: release the claim before propagating
                    let _ = self.log.release(&action.id);
                    return Err(e);
                }
            };

            match outcome {
                Dispatch::Applied => result.applied += 1,
                Dispatch::Retired => {}
                Dispatch::Skipped => {
                    self.log.release(&action.id)?;
                    blocked.insert(action.entity_id.clone());
                    result.skipped += 1;
                }
                Dispatch::Failed(RemoteError::Cancelled) => {
                    self.log.release(&action.id)?;
                    result.deferred += total - idx;
                    break;
                }
                Dispatch::Failed(err) => {
                    blocked.insert(action.entity_id.clone());
                    self.record_failure(&action, &err, result)?;
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&self, action: &Action) -> Result<Dispatch> {
        tracing::debug!(
            action_id = %action.id,
            entity_id = %action.entity_id,
            source = action.source.as_str(),
            "dispatching {} action",
            action.action_type.as_str()
        );
        match (action.entity_type, action.source) {
            (EntityType::Tag, _) => {
                self.log.retire_with_note(&action.id, NOTE_TAG_NOT_MIRRORED)?;
                Ok(Dispatch::Retired)
            }
            (EntityType::Event, ActionSource::Remote) => self.apply_remote(action),
            (EntityType::Event, ActionSource::Local) => match action.action_type {
                ActionType::Create | ActionType::Update => self.push_upsert(action).await,
                ActionType::Delete => self.push_delete(action).await,
            },
        }
    }

    fn target_calendar(&self, event: &Event) -> Result<Option<String>> {
        let default = self.config.default_calendar_id.as_deref();
        Ok(self
            .db
            .with_conn(|conn| resolve_target_calendar_in(conn, event, default))?)
    }

    /// Send a local create/update. An update for an event never created
    /// remotely becomes a create.
    async fn push_upsert(&self, action: &Action) -> Result<Dispatch> {
        let Some(current) = self.service.get_event_by_id(&action.entity_id)? else {
            self.log.retire_with_note(&action.id, NOTE_EVENT_GONE)?;
            return Ok(Dispatch::Retired);
        };
        match current.sync_status {
            SyncStatus::Conflict => return Ok(Dispatch::Skipped),
            SyncStatus::LocalOnly => {
                self.log.retire_with_note(&action.id, NOTE_LOCAL_ONLY)?;
                return Ok(Dispatch::Retired);
            }
            _ => {}
        }

        let sent = match snapshot_to_event(&action.data) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let message = format!("malformed snapshot: {e}");
                return Ok(Dispatch::Failed(RemoteError::Decode(message)));
            }
        };
        let Some(calendar_id) = self.target_calendar(&current)? else {
            tracing::debug!(event_id = %current.id, "no target calendar yet; leaving pending");
            return Ok(Dispatch::Skipped);
        };
        let payload = event_to_payload(&sent);

        let created = match &current.external_id {
            Some(remote_id) => {
                let calendar_id = current
                    .remote_calendar_id
                    .clone()
                    .unwrap_or_else(|| calendar_id.clone());
                if let Err(e) = self
                    .call(self.remote.update_event(&calendar_id, remote_id, &payload))
                    .await
                {
                    return Ok(Dispatch::Failed(e));
                }
                None
            }
            None => match self
                .call(self.remote.create_event(&calendar_id, &payload))
                .await
            {
                Ok(remote_id) => Some((remote_id, calendar_id)),
                Err(e) => return Ok(Dispatch::Failed(e)),
            },
        };

        let touched = self.db.transaction(|conn| {
            action_log::mark_synchronized_in(conn, &action.id)?;
            let Some(event) = event_store::get_in(conn, &action.entity_id)? else {
                if let Some((remote_id, calendar_id)) = &created {
                    address_pending_delete_in(conn, &action.entity_id, remote_id, calendar_id)?;
                }
                return Ok(false);
            };
            let mut patch = EventPatch::default();
            if let Some((remote_id, calendar_id)) = &created {
                patch.external_id = Some(remote_id.clone());
                patch.remote_calendar_id = Some(calendar_id.clone());
            }
            // A failure of an earlier action is cleared once the current version lands
            if event.local_version == sent.local_version
                && matches!(event.sync_status, SyncStatus::Pending | SyncStatus::Error)
            {
                patch.sync_status = Some(SyncStatus::Synced);
                patch.last_sync_error = Some(None);
            }
            Ok(self
                .service
                .update_event_in(conn, &event.id, &patch, true)?
                .is_ok())
        })?;

        if touched {
            self.emit_events(vec![action.entity_id.clone()], ActionSource::Remote);
        }
        Ok(Dispatch::Applied)
    }

    async fn push_delete(&self, action: &Action) -> Result<Dispatch> {
        let (remote_id, remote_calendar) = delete_target(&action.data);
        let Some(remote_id) = remote_id else {
            let create_in_flight = self
                .log
                .open_for_entity(&action.entity_id)?
                .iter()
                .any(|a| a.id != action.id && a.in_flight);
            if create_in_flight {
                return Ok(Dispatch::Skipped);
            }
            self.log.retire_with_note(&action.id, NOTE_NOTHING_REMOTE)?;
            return Ok(Dispatch::Retired);
        };

        let calendar_id = match remote_calendar {
            Some(calendar_id) => Some(calendar_id),
            None => match snapshot_calendar_ids(&action.data) {
                Some(ids) => ids.into_iter().next(),
                None => self.config.default_calendar_id.clone(),
            },
        };
        let Some(calendar_id) = calendar_id else {
            return Ok(Dispatch::Skipped);
        };

        match self
            .call(self.remote.delete_event(&calendar_id, &remote_id))
            .await
        {
            Ok(()) => {
                self.log.mark_synchronized(&action.id)?;
                Ok(Dispatch::Applied)
            }
            Err(e) => Ok(Dispatch::Failed(e)),
        }
    }

    /// Write a remote-sourced action into the local store.
    ///
    /// Applying the same action twice leaves the store unchanged.
    fn apply_remote(&self, action: &Action) -> Result<Dispatch> {
        let entity_id = action.entity_id.clone();
        let changed = match action.action_type {
            ActionType::Create | ActionType::Update => {
                let incoming = match snapshot_to_event(&action.data) {
                    Ok(event) => event,
                    Err(e) => {
                        let message = format!("malformed snapshot: {e}");
                        tracing::error!(action_id = %action.id, "{message}");
                        self.log.retire_failed(&action.id, &message)?;
                        return Ok(Dispatch::Retired);
                    }
                };
                self.db.transaction(|conn| {
                    let applied = match event_store::get_in(conn, &entity_id)? {
                        None if deleted_since_in(conn, &entity_id)? => Ok(false),
                        None => self
                            .service
                            .insert_remote_event_in(conn, &incoming)?
                            .map(|()| true),
                        Some(current) => {
                            let patch = if current.local_version > incoming.local_version {
                                // Edited locally after the pull; keep content, record the address
                                EventPatch {
                                    external_id: incoming.external_id.clone(),
                                    remote_calendar_id: incoming.remote_calendar_id.clone(),
                                    ..Default::default()
                                }
                            } else {
                                snapshot_to_patch(&incoming)
                            };
                            self.service
                                .update_event_in(conn, &entity_id, &patch, true)?
                                .map(|next| next != current)
                        }
                    };
                    match applied {
                        Ok(changed) => {
                            action_log::mark_synchronized_in(conn, &action.id)?;
                            Ok(changed)
                        }
                        Err(invalid) => {
                            let message = invalid.to_string();
                            tracing::error!(action_id = %action.id, "rejected remote change: {message}");
                            action_log::retire_failed_in(conn, &action.id, &message)?;
                            Ok(false)
                        }
                    }
                })?
            }
            ActionType::Delete => self.db.transaction(|conn| {
                let removed =
                    self.service
                        .remove_remote_event_in(conn, &entity_id, NOTE_SUPERSEDED_BY_REMOTE)?;
                action_log::mark_synchronized_in(conn, &action.id)?;
                Ok(removed)
            })?,
        };

        if changed {
            self.emit_events(vec![entity_id], ActionSource::Remote);
        }
        Ok(Dispatch::Applied)
    }

    fn record_failure(
        &self,
        action: &Action,
        err: &RemoteError,
        result: &mut SyncResult,
    ) -> Result<()> {
        let message = err.to_string();
        result.failed += 1;

        let exhausted = if err.is_transient() {
            match self.log.mark_failed(&action.id, &message)? {
                FailureOutcome::Retrying {
                    retry_count,
                    next_attempt_at,
                } => {
                    if let Some(hint) = err.retry_after() {
                        let hint = chrono::Duration::from_std(hint)
                            .unwrap_or_else(|_| chrono::Duration::seconds(300));
                        self.log.postpone(&action.id, self.clock.now() + hint)?;
                    }
                    tracing::warn!(
                        action_id = %action.id,
                        entity_id = %action.entity_id,
                        retry_count,
                        %next_attempt_at,
                        "transient sync failure: {message}"
                    );
                    false
                }
                FailureOutcome::Exhausted { retry_count } => {
                    tracing::error!(
                        action_id = %action.id,
                        retry_count,
                        "retry ceiling reached: {message}"
                    );
                    true
                }
            }
        } else {
            self.log.retire_failed(&action.id, &message)?;
            tracing::error!(
                action_id = %action.id,
                entity_id = %action.entity_id,
                "terminal sync failure: {message}"
            );
            true
        };

        if exhausted && action.source == ActionSource::Local {
            let patch = EventPatch {
                sync_status: Some(SyncStatus::Error),
                last_sync_error: Some(Some(message.clone())),
                ..Default::default()
            };
            let marked = self.db.transaction(|conn| {
                if event_store::get_in(conn, &action.entity_id)?.is_none() {
                    return Ok(false);
                }
                Ok(self
                    .service
                    .update_event_in(conn, &action.entity_id, &patch, true)?
                    .is_ok())
            })?;
            if marked {
                self.emit(Notification::SyncFailed {
                    event_id: action.entity_id.clone(),
                    message: message.clone(),
                    at: self.clock.now(),
                });
            }
        }

        result.errors.push(SyncFailure {
            action_id: Some(action.id.clone()),
            entity_id: Some(action.entity_id.clone()),
            message,
            terminal: exhausted,
        });
        Ok(())
    }

    /// Calendars pulled each cycle: the configured list, else every calendar
    /// the tag mappings and default point at.
    fn calendars_to_pull(&self) -> Result<Vec<String>> {
        if !self.pull_calendars.is_empty() {
            return Ok(self.pull_calendars.clone());
        }
        let default = self.config.default_calendar_id.as_deref();
        let mut calendars = self.db.with_conn(|conn| {
            let tag_ids: Vec<String> = event_store::list_tags_in(conn)?
                .into_iter()
                .map(|t| t.id)
                .collect();
            derive_calendar_ids_in(conn, &tag_ids, None).map(|mut ids| {
                ids.extend(default.map(str::to_string));
                ids
            })
        })?;
        calendars.sort();
        calendars.dedup();
        Ok(calendars)
    }

    async fn reconcile(&self, deadline: Instant, result: &mut SyncResult) -> Result<()> {
        for calendar_id in self.calendars_to_pull()? {
            if Instant::now() >= deadline || self.is_shut_down() || !self.is_online() {
                break;
            }
            self.pull_calendar(&calendar_id, result).await?;
        }
        self.apply_pending_remote()
    }

    /// Apply every queued remote-sourced action, so the next change of the
    /// same feed sees its effect.
    fn apply_pending_remote(&self) -> Result<()> {
        let remote_actions: Vec<Action> = self
            .log
            .list_pending()?
            .into_iter()
            .filter(|a| a.source == ActionSource::Remote && !a.in_flight)
            .collect();
        for action in remote_actions {
            if !self.log.begin_dispatch(&action.id)? {
                continue;
            }
            if let Err(e) = self.apply_remote(&action) {
                let _ = self.log.release(&action.id);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn pull_calendar(&self, calendar_id: &str, result: &mut SyncResult) -> Result<()> {
        let key = cursor_key(calendar_id);
        let cursor = self.db.kv_get(&key)?;
        let window = PullWindow::around(self.clock.local_now(), self.config.pull_window_days);

        let mut page = self
            .call(self.remote.list_events(calendar_id, cursor.as_deref(), window))
            .await;
        if cursor.is_some() && matches!(page, Err(RemoteError::NotFound)) {
            tracing::warn!(calendar_id, "pull cursor expired; starting a full pull");
            self.db.kv_delete(&key)?;
            page = self
                .call(self.remote.list_events(calendar_id, None, window))
                .await;
        }

        let page = match page {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(calendar_id, "pull failed: {err}");
                result.errors.push(SyncFailure {
                    action_id: None,
                    entity_id: None,
                    message: format!("pull {calendar_id}: {err}"),
                    terminal: !err.is_transient(),
                });
                return Ok(());
            }
        };

        tracing::debug!(calendar_id, changes = page.changes.len(), "pulled remote changes");
        for change in &page.changes {
            self.reconcile_change(change, result)?;
            self.apply_pending_remote()?;
        }
        result.pulled += page.changes.len();
        if let Some(next) = &page.cursor {
            self.db.kv_set(&key, next)?;
        }
        Ok(())
    }

    /// Turn one remote change into `source = remote` actions (and, when the
    /// local version wins, a local update to push it).
    fn reconcile_change(&self, change: &RemoteChange, result: &mut SyncResult) -> Result<()> {
        let now = self.clock.now();
        match change {
            RemoteChange::Removed { remote_id } => {
                let Some(local) = self
                    .db
                    .with_conn(|conn| event_store::find_by_external_id_in(conn, remote_id))?
                else {
                    return Ok(());
                };
                self.log.enqueue(&NewAction::remote(
                    ActionType::Delete,
                    &local.id,
                    serde_json::json!({ "id": local.id, "external_id": remote_id }),
                    Some(event_to_snapshot(&local)?),
                ))?;
                Ok(())
            }
            RemoteChange::Upserted(remote) => {
                let conflict = self.db.transaction(|conn| {
                    self.reconcile_upsert_in(conn, now, remote)
                })?;
                if let Some(event_id) = conflict {
                    result.conflicts += 1;
                    self.emit(Notification::ConflictFlagged {
                        event_id,
                        at: self.clock.now(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Returns the event id when a conflict was flagged.
    fn reconcile_upsert_in(
        &self,
        conn: &Connection,
        now: DateTime<Utc>,
        remote: &RemoteEvent,
    ) -> std::result::Result<Option<String>, StoreError> {
        let local = match event_store::find_by_external_id_in(conn, &remote.remote_id)? {
            Some(local) => Some(local),
            None => match &remote.local_id {
                Some(local_id) => event_store::get_in(conn, local_id)?
                    .filter(|e| e.external_id.is_none()),
                None => None,
            },
        };

        let Some(mut local) = local else {
            if self.deleted_locally_in(conn, remote)? {
                return Ok(None);
            }
            let event = remote_to_new_event(remote, Uuid::new_v4().to_string(), self.clock.local_now());
            action_log::enqueue_in(
                conn,
                now,
                &NewAction::remote(
                    ActionType::Create,
                    &event.id,
                    event_to_snapshot(&event).map_err(store_err)?,
                    None,
                ),
            )?;
            return Ok(None);
        };
        if matches!(
            local.sync_status,
            SyncStatus::LocalOnly | SyncStatus::Conflict
        ) {
            return Ok(None);
        }
        if local.external_id.is_none() {
            // Our own create landed but its response never arrived; later
            // pushes must address this copy instead of creating another
            let address = EventPatch {
                external_id: Some(remote.remote_id.clone()),
                remote_calendar_id: Some(remote.calendar_id.clone()),
                ..Default::default()
            };
            if let Ok(addressed) = self.service.update_event_in(conn, &local.id, &address, true)? {
                tracing::info!(event_id = %local.id, remote_id = %remote.remote_id, "matched echoed create");
                local = addressed;
            }
        }

        let open_local: Vec<Action> = action_log::open_for_entity_in(conn, &local.id)?
            .into_iter()
            .filter(|a| a.source == ActionSource::Local)
            .collect();
        let baseline = open_local
            .iter()
            .find_map(|a| a.previous_data.as_ref())
            .and_then(|data| snapshot_to_event(data).ok());

        let resolution = resolve(&local, remote, baseline.as_ref());
        let mut winner = resolution.winner;

        let write_remote = |conn: &Connection, winner: &Event| {
            action_log::enqueue_in(
                conn,
                now,
                &NewAction::remote(
                    ActionType::Update,
                    &local.id,
                    event_to_snapshot(winner).map_err(store_err)?,
                    Some(event_to_snapshot(&local).map_err(store_err)?),
                ),
            )
            .map(|_| ())
        };

        if resolution.unchanged {
            let settled = open_local.is_empty()
                && (local.external_id.as_deref() != Some(remote.remote_id.as_str())
                    || local.sync_status != SyncStatus::Synced);
            if settled {
                winner.sync_status = SyncStatus::Synced;
                winner.last_sync_error = None;
                write_remote(conn, &winner)?;
            }
            return Ok(None);
        }

        if resolution.conflict {
            tracing::warn!(event_id = %local.id, "conflicting edits on both sides");
            write_remote(conn, &winner)?;
            return Ok(Some(local.id.clone()));
        }

        match resolution.winner_side {
            Side::Remote => {
                for stale in open_local.iter().filter(|a| a.accepts_coalescing()) {
                    action_log::retire_with_note_in(conn, &stale.id, NOTE_SUPERSEDED_BY_REMOTE)?;
                }
                write_remote(conn, &winner)?;
            }
            Side::Local => {
                winner.sync_status = SyncStatus::Pending;
                if winner != local {
                    write_remote(conn, &winner)?;
                }
                if open_local.is_empty() {
                    let mut pushed = winner.clone();
                    pushed.sync_status = SyncStatus::Pending;
                    action_log::enqueue_in(
                        conn,
                        now,
                        &NewAction::local(
                            ActionType::Update,
                            EntityType::Event,
                            &local.id,
                            event_to_snapshot(&pushed).map_err(store_err)?,
                            None,
                        ),
                    )?;
                }
            }
        }
        Ok(None)
    }

    /// Whether a remote event belongs to a local event deleted since, with
    /// its delete still queued.
    fn deleted_locally_in(
        &self,
        conn: &Connection,
        remote: &RemoteEvent,
    ) -> std::result::Result<bool, StoreError> {
        if let Some(local_id) = &remote.local_id {
            if deleted_since_in(conn, local_id)? {
                return Ok(true);
            }
        }
        Ok(action_log::list_pending_in(conn)?.iter().any(|a| {
            a.action_type == ActionType::Delete
                && a.source == ActionSource::Local
                && delete_target(&a.data).0.as_deref() == Some(remote.remote_id.as_str())
        }))
    }
}

/// Whether the entity has a queued local delete.
fn deleted_since_in(conn: &Connection, entity_id: &str) -> std::result::Result<bool, StoreError> {
    Ok(action_log::open_for_entity_in(conn, entity_id)?
        .iter()
        .any(|a| a.source == ActionSource::Local && a.action_type == ActionType::Delete))
}

/// Give a queued delete the address of a remote copy created while the
/// delete was waiting.
fn address_pending_delete_in(
    conn: &Connection,
    entity_id: &str,
    remote_id: &str,
    calendar_id: &str,
) -> std::result::Result<(), StoreError> {
    for action in action_log::open_for_entity_in(conn, entity_id)? {
        if action.action_type != ActionType::Delete || delete_target(&action.data).0.is_some() {
            continue;
        }
        let mut data = action.data.clone();
        if let Some(object) = data.as_object_mut() {
            object.insert("external_id".to_string(), serde_json::json!(remote_id));
            object.insert("remote_calendar_id".to_string(), serde_json::json!(calendar_id));
            action_log::patch_data_in(conn, &action.id, &data)?;
            tracing::debug!(action_id = %action.id, remote_id, "addressed pending delete");
        }
    }
    Ok(())
}
