//! Persistent, ordered action log.
//!
//! Every row is one intended remote-side effect. Rows are only ever mutated in
//! their outcome columns (`synchronized`, `failed`, `retry_count`, `last_error`,
//! `next_attempt_at`, `in_flight`), except that a newer local mutation of the
//! same entity folds its snapshot into the active row instead of appending.
//! Each outcome update is written immediately.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use super::backoff::BackoffPolicy;
use super::clock::Clock;
use super::types::{
    Action, ActionId, ActionLogStats, ActionSource, ActionType, EntityType, FailureOutcome,
    NewAction,
};
use crate::error::StoreError;
use crate::storage::Database;

/// Note recorded on a never-sent create retired by the deletion of its event.
pub const NOTE_CANCELLED_BY_DELETE: &str = "cancelled by delete";
/// Note recorded on a pending update made redundant by a delete.
pub const NOTE_SUPERSEDED_BY_DELETE: &str = "superseded by delete";

const ACTION_COLUMNS: &str = "seq, id, action_type, entity_type, entity_id, source, data,
     previous_data, timestamp, synchronized, failed, retry_count, last_error,
     next_attempt_at, in_flight";

const ACTIVE: &str = "synchronized = 0 AND failed = 0";

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Fresh action id: generation time in milliseconds plus a random suffix.
pub fn generate_action_id(now: DateTime<Utc>) -> ActionId {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{}-{}", now.timestamp_millis(), suffix)
}

struct ActionRow {
    seq: i64,
    id: String,
    action_type: String,
    entity_type: String,
    entity_id: String,
    source: String,
    data: String,
    previous_data: Option<String>,
    timestamp: String,
    synchronized: bool,
    failed: bool,
    retry_count: i64,
    last_error: Option<String>,
    next_attempt_at: Option<String>,
    in_flight: bool,
}

fn read_action_row(row: &rusqlite::Row) -> Result<ActionRow, rusqlite::Error> {
    Ok(ActionRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        action_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        source: row.get(5)?,
        data: row.get(6)?,
        previous_data: row.get(7)?,
        timestamp: row.get(8)?,
        synchronized: row.get(9)?,
        failed: row.get(10)?,
        retry_count: row.get(11)?,
        last_error: row.get(12)?,
        next_attempt_at: row.get(13)?,
        in_flight: row.get(14)?,
    })
}

fn corrupt(id: &str, message: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        table: "actions",
        message: format!("{id}: {message}"),
    }
}

fn decode_action(row: ActionRow) -> Result<Action, StoreError> {
    let action_type = ActionType::parse(&row.action_type)
        .ok_or_else(|| corrupt(&row.id, format!("bad action_type '{}'", row.action_type)))?;
    let entity_type = EntityType::parse(&row.entity_type)
        .ok_or_else(|| corrupt(&row.id, format!("bad entity_type '{}'", row.entity_type)))?;
    let source = ActionSource::parse(&row.source)
        .ok_or_else(|| corrupt(&row.id, format!("bad source '{}'", row.source)))?;
    let data = serde_json::from_str(&row.data).map_err(|e| corrupt(&row.id, e))?;
    let previous_data = row
        .previous_data
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| corrupt(&row.id, e))?;
    let timestamp = parse_ts(&row.timestamp)
        .ok_or_else(|| corrupt(&row.id, format!("bad timestamp '{}'", row.timestamp)))?;
    let next_attempt_at = match row.next_attempt_at.as_deref() {
        Some(value) => Some(
            parse_ts(value)
                .ok_or_else(|| corrupt(&row.id, format!("bad next_attempt_at '{value}'")))?,
        ),
        None => None,
    };

    Ok(Action {
        id: row.id,
        seq: row.seq,
        action_type,
        entity_type,
        entity_id: row.entity_id,
        source,
        data,
        previous_data,
        timestamp,
        synchronized: row.synchronized,
        failed: row.failed,
        retry_count: row.retry_count.max(0) as u32,
        last_error: row.last_error,
        next_attempt_at,
        in_flight: row.in_flight,
    })
}

fn query_actions(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<Action>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, read_action_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(decode_action).collect()
}

fn to_json(value: &serde_json::Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::QueryFailed(e.to_string()))
}

pub(crate) fn get_in(conn: &Connection, id: &str) -> Result<Option<Action>, StoreError> {
    let sql = format!("SELECT {ACTION_COLUMNS} FROM actions WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id], read_action_row)
        .optional()?;
    row.map(decode_action).transpose()
}

/// Active (not retired) actions of one entity, oldest first.
pub(crate) fn open_for_entity_in(
    conn: &Connection,
    entity_id: &str,
) -> Result<Vec<Action>, StoreError> {
    let sql =
        format!("SELECT {ACTION_COLUMNS} FROM actions WHERE entity_id = ?1 AND {ACTIVE} ORDER BY seq");
    query_actions(conn, &sql, params![entity_id])
}

fn coalescing_target_in(
    conn: &Connection,
    entity_id: &str,
) -> Result<Option<Action>, StoreError> {
    Ok(open_for_entity_in(conn, entity_id)?
        .into_iter()
        .rev()
        .find(Action::accepts_coalescing))
}

/// Append an action, folding local create/update mutations into the active
/// action of the same entity.
pub(crate) fn enqueue_in(
    conn: &Connection,
    now: DateTime<Utc>,
    action: &NewAction,
) -> Result<ActionId, StoreError> {
    let folds = action.source == ActionSource::Local
        && matches!(action.action_type, ActionType::Create | ActionType::Update);

    if folds {
        if let Some(existing) = coalescing_target_in(conn, &action.entity_id)? {
            conn.execute(
                "UPDATE actions SET data = ?2 WHERE id = ?1",
                params![existing.id, to_json(&action.data)?],
            )?;
            tracing::debug!(
                action_id = %existing.id,
                entity_id = %action.entity_id,
                "coalesced local mutation into pending {}",
                existing.action_type.as_str()
            );
            return Ok(existing.id);
        }
    }

    if action.source == ActionSource::Local && action.action_type == ActionType::Delete {
        for superseded in open_for_entity_in(conn, &action.entity_id)?
            .into_iter()
            .filter(Action::accepts_coalescing)
        {
            retire_with_note_in(conn, &superseded.id, NOTE_SUPERSEDED_BY_DELETE)?;
        }
    }

    let previous_data = action.previous_data.as_ref().map(to_json).transpose()?;
    let data = to_json(&action.data)?;
    for _ in 0..3 {
        let id = generate_action_id(now);
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO actions (id, action_type, entity_type, entity_id, source,
                 data, previous_data, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                action.action_type.as_str(),
                action.entity_type.as_str(),
                action.entity_id,
                action.source.as_str(),
                data,
                previous_data,
                format_ts(now),
            ],
        )?;
        if inserted == 1 {
            tracing::debug!(
                action_id = %id,
                entity_id = %action.entity_id,
                source = action.source.as_str(),
                "enqueued {} action",
                action.action_type.as_str()
            );
            return Ok(id);
        }
    }
    Err(StoreError::QueryFailed(
        "could not allocate a unique action id".to_string(),
    ))
}

/// Retire an action as synchronized without dispatching it.
pub(crate) fn retire_with_note_in(
    conn: &Connection,
    id: &str,
    note: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE actions SET synchronized = 1, in_flight = 0, next_attempt_at = NULL,
             last_error = ?2
         WHERE id = ?1",
        params![id, note],
    )?;
    Ok(())
}

pub(crate) fn patch_data_in(
    conn: &Connection,
    id: &str,
    data: &serde_json::Value,
) -> Result<(), StoreError> {
    conn.execute(
        &format!("UPDATE actions SET data = ?2 WHERE id = ?1 AND {ACTIVE}"),
        params![id, to_json(data)?],
    )?;
    Ok(())
}

pub(crate) fn mark_synchronized_in(conn: &Connection, id: &str) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE actions SET synchronized = 1, in_flight = 0, next_attempt_at = NULL
         WHERE id = ?1",
        params![id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "action",
            id: id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn retire_failed_in(conn: &Connection, id: &str, error: &str) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE actions SET failed = 1, in_flight = 0, next_attempt_at = NULL, last_error = ?2
         WHERE id = ?1",
        params![id, error],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "action",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Restore per-entity order: ordered by enqueue time overall, but within one
/// entity local actions take the earliest slots.
fn order_local_first(actions: Vec<Action>) -> Vec<Action> {
    let mut slots: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, action) in actions.iter().enumerate() {
        slots.entry(action.entity_id.clone()).or_default().push(idx);
    }

    let mut ordered: Vec<Option<Action>> = vec![None; actions.len()];
    let mut by_entity: HashMap<String, Vec<Action>> = HashMap::new();
    for action in actions {
        by_entity
            .entry(action.entity_id.clone())
            .or_default()
            .push(action);
    }
    for (entity_id, mut group) in by_entity {
        // Stable: keeps enqueue order within the same source.
        group.sort_by_key(|a| a.source == ActionSource::Remote);
        let positions = slots.remove(&entity_id).unwrap_or_default();
        for (pos, action) in positions.into_iter().zip(group) {
            ordered[pos] = Some(action);
        }
    }
    ordered.into_iter().flatten().collect()
}

pub(crate) fn list_pending_in(conn: &Connection) -> Result<Vec<Action>, StoreError> {
    let sql = format!("SELECT {ACTION_COLUMNS} FROM actions WHERE {ACTIVE} ORDER BY timestamp, seq");
    Ok(order_local_first(query_actions(conn, &sql, [])?))
}

/// Handle to the action log.
#[derive(Clone)]
pub struct ActionLog {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    backoff: BackoffPolicy,
}

impl ActionLog {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            max_retries: 5,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Set the retry ceiling and backoff schedule used by [`mark_failed`](Self::mark_failed).
    pub fn with_retry_policy(mut self, max_retries: u32, backoff: BackoffPolicy) -> Self {
        self.max_retries = max_retries.max(1);
        self.backoff = backoff;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Append an action and return its id.
    ///
    /// A local create/update for an entity that already has an active local
    /// create/update (not in flight) replaces that action's `data` and returns
    /// its id; its original `previous_data`, type and position are kept.
    /// A local delete retires the entity's pending updates as superseded.
    pub fn enqueue(&self, action: &NewAction) -> Result<ActionId, StoreError> {
        let now = self.clock.now();
        self.db.transaction(|conn| enqueue_in(conn, now, action))
    }

    pub fn get(&self, id: &str) -> Result<Option<Action>, StoreError> {
        self.db.with_conn(|conn| get_in(conn, id))
    }

    /// Every action that is neither synchronized nor failed.
    ///
    /// Ordered by enqueue time; for the same entity, local actions come before
    /// remote-sourced ones.
    pub fn list_pending(&self) -> Result<Vec<Action>, StoreError> {
        self.db.with_conn(list_pending_in)
    }

    /// Pending actions that are not in flight and past their backoff gate.
    pub fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Action>, StoreError> {
        Ok(self
            .list_pending()?
            .into_iter()
            .filter(|a| a.is_due(now))
            .collect())
    }

    /// Active actions of one entity, oldest first.
    pub fn open_for_entity(&self, entity_id: &str) -> Result<Vec<Action>, StoreError> {
        self.db.with_conn(|conn| open_for_entity_in(conn, entity_id))
    }

    /// Claim an action for dispatch. Returns `false` if it is no longer pending
    /// or already claimed.
    pub fn begin_dispatch(&self, id: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                &format!("UPDATE actions SET in_flight = 1 WHERE id = ?1 AND {ACTIVE} AND in_flight = 0"),
                params![id],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn mark_synchronized(&self, id: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| mark_synchronized_in(conn, id))
    }

    /// Record a transient failure.
    ///
    /// Increments `retry_count` and gates the next attempt by the backoff
    /// schedule; once the retry ceiling is reached the action is retired as
    /// failed instead.
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<FailureOutcome, StoreError> {
        let now = self.clock.now();
        let max_retries = self.max_retries;
        let backoff = self.backoff;
        self.db.transaction(|conn| {
            let action = get_in(conn, id)?.ok_or_else(|| StoreError::NotFound {
                entity: "action",
                id: id.to_string(),
            })?;
            let retry_count = action.retry_count.saturating_add(1);

            if retry_count >= max_retries {
                conn.execute(
                    "UPDATE actions SET retry_count = ?2, failed = 1, in_flight = 0,
                         next_attempt_at = NULL, last_error = ?3
                     WHERE id = ?1",
                    params![id, retry_count, error],
                )?;
                return Ok(FailureOutcome::Exhausted { retry_count });
            }

            let delay = chrono::Duration::from_std(backoff.delay(retry_count))
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
            let next_attempt_at = now + delay;
            conn.execute(
                "UPDATE actions SET retry_count = ?2, in_flight = 0, next_attempt_at = ?3,
                     last_error = ?4
                 WHERE id = ?1",
                params![id, retry_count, format_ts(next_attempt_at), error],
            )?;
            Ok(FailureOutcome::Retrying {
                retry_count,
                next_attempt_at,
            })
        })
    }

    /// Push the backoff gate of a pending action out to at least `until`.
    pub fn postpone(&self, id: &str, until: DateTime<Utc>) -> Result<(), StoreError> {
        let until = format_ts(until);
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "UPDATE actions SET next_attempt_at = ?2
                     WHERE id = ?1 AND {ACTIVE}
                       AND (next_attempt_at IS NULL OR next_attempt_at < ?2)"
                ),
                params![id, until],
            )?;
            Ok(())
        })
    }

    /// Retire an action after a terminal failure.
    pub fn retire_failed(&self, id: &str, error: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| retire_failed_in(conn, id, error))
    }

    /// Retire an action as synchronized without dispatching it.
    pub fn retire_with_note(&self, id: &str, note: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| retire_with_note_in(conn, id, note))
    }

    /// Release a claim without recording an outcome.
    pub fn release(&self, id: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("UPDATE actions SET in_flight = 0 WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Collapse the entity's active local create/update actions into the oldest one.
    ///
    /// The survivor takes the newest `data`, keeps its own `previous_data`, and
    /// stays a `create` if it was one. The others are retired as synchronized.
    /// Returns `true` if anything was collapsed.
    pub fn coalesce(&self, entity_id: &str) -> Result<bool, StoreError> {
        self.db.transaction(|conn| {
            let candidates: Vec<Action> = open_for_entity_in(conn, entity_id)?
                .into_iter()
                .filter(Action::accepts_coalescing)
                .collect();
            let (Some(survivor), Some(newest)) = (candidates.first(), candidates.last()) else {
                return Ok(false);
            };
            if candidates.len() < 2 {
                return Ok(false);
            }

            let action_type = if candidates
                .iter()
                .any(|a| a.action_type == ActionType::Create)
            {
                ActionType::Create
            } else {
                survivor.action_type
            };
            conn.execute(
                "UPDATE actions SET data = ?2, action_type = ?3 WHERE id = ?1",
                params![survivor.id, to_json(&newest.data)?, action_type.as_str()],
            )?;
            let note = format!("coalesced into {}", survivor.id);
            for other in &candidates[1..] {
                retire_with_note_in(conn, &other.id, &note)?;
            }
            tracing::debug!(
                entity_id,
                survivor = %survivor.id,
                collapsed = candidates.len() - 1,
                "coalesced pending actions"
            );
            Ok(true)
        })
    }

    /// Replace the snapshot of a pending action.
    pub fn patch_data(&self, id: &str, data: &serde_json::Value) -> Result<(), StoreError> {
        self.db.with_conn(|conn| patch_data_in(conn, id, data))
    }

    /// Clear in-flight claims left behind by an interrupted process.
    ///
    /// The remote call may or may not have landed; the action is simply
    /// dispatched again.
    pub fn recover_in_flight(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("UPDATE actions SET in_flight = 0 WHERE in_flight = 1", [])?;
            if changed > 0 {
                tracing::warn!(count = changed, "released in-flight actions after interruption");
            }
            Ok(changed)
        })
    }

    /// Delete retired actions beyond the newest `keep`. Returns rows removed.
    pub fn compact(&self, keep: usize) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM actions
                 WHERE (synchronized = 1 OR failed = 1)
                   AND seq NOT IN (
                       SELECT seq FROM actions
                       WHERE synchronized = 1 OR failed = 1
                       ORDER BY seq DESC
                       LIMIT ?1
                   )",
                params![keep as i64],
            )?;
            if removed > 0 {
                tracing::debug!(removed, keep, "compacted action log");
            }
            Ok(removed)
        })
    }

    pub fn stats(&self) -> Result<ActionLogStats, StoreError> {
        self.db.with_conn(|conn| {
            let (total, pending, in_flight, synchronized, failed): (i64, i64, i64, i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(CASE WHEN synchronized = 0 AND failed = 0 THEN 1 ELSE 0 END), 0),
                            COALESCE(SUM(in_flight), 0),
                            COALESCE(SUM(synchronized), 0),
                            COALESCE(SUM(CASE WHEN synchronized = 0 AND failed = 1 THEN 1 ELSE 0 END), 0)
                     FROM actions",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )?;
            Ok(ActionLogStats {
                total: total as usize,
                pending: pending as usize,
                in_flight: in_flight as usize,
                synchronized: synchronized as usize,
                failed: failed as usize,
            })
        })
    }

    /// Read-only snapshot of the whole log in log order.
    pub fn queue(&self) -> Result<Vec<Action>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {ACTION_COLUMNS} FROM actions ORDER BY seq");
            query_actions(conn, &sql, [])
        })
    }
}
