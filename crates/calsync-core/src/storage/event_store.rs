//! SQLite-backed store for events and tags.
//!
//! Every function operates on a borrowed connection so the event service can
//! combine an event write and an action append in one transaction. Writes go
//! through [`EventService`](crate::sync::EventService) only.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::model::{format_local, parse_local, ConflictCopy, Event, SyncStatus, Tag};

const EVENT_COLUMNS: &str = "id, external_id, remote_calendar_id, title, start_time, end_time,
     is_all_day, calendar_ids, tag_ids, sync_status, created_at, updated_at,
     local_version, conflict_copy, last_sync_error";

/// Raw column values of an `events` row, decoded outside the rusqlite closure.
struct EventRow {
    id: String,
    external_id: Option<String>,
    remote_calendar_id: Option<String>,
    title: String,
    start_time: String,
    end_time: String,
    is_all_day: bool,
    calendar_ids: String,
    tag_ids: String,
    sync_status: String,
    created_at: String,
    updated_at: String,
    local_version: i64,
    conflict_copy: Option<String>,
    last_sync_error: Option<String>,
}

fn read_event_row(row: &rusqlite::Row) -> Result<EventRow, rusqlite::Error> {
    Ok(EventRow {
        id: row.get(0)?,
        external_id: row.get(1)?,
        remote_calendar_id: row.get(2)?,
        title: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        is_all_day: row.get(6)?,
        calendar_ids: row.get(7)?,
        tag_ids: row.get(8)?,
        sync_status: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        local_version: row.get(12)?,
        conflict_copy: row.get(13)?,
        last_sync_error: row.get(14)?,
    })
}

fn corrupt(message: String) -> StoreError {
    StoreError::Corrupt {
        table: "events",
        message,
    }
}

fn decode_time(id: &str, column: &str, value: &str) -> Result<chrono::NaiveDateTime, StoreError> {
    parse_local(value).ok_or_else(|| corrupt(format!("{id}: bad {column} '{value}'")))
}

fn decode_event(row: EventRow) -> Result<Event, StoreError> {
    let sync_status = SyncStatus::parse(&row.sync_status)
        .ok_or_else(|| corrupt(format!("{}: bad sync_status '{}'", row.id, row.sync_status)))?;
    let calendar_ids: Vec<String> = serde_json::from_str(&row.calendar_ids)
        .map_err(|e| corrupt(format!("{}: calendar_ids: {e}", row.id)))?;
    let tag_ids: Vec<String> = serde_json::from_str(&row.tag_ids)
        .map_err(|e| corrupt(format!("{}: tag_ids: {e}", row.id)))?;
    let conflict_copy: Option<ConflictCopy> = match row.conflict_copy.as_deref() {
        Some(json) => Some(
            serde_json::from_str(json)
                .map_err(|e| corrupt(format!("{}: conflict_copy: {e}", row.id)))?,
        ),
        None => None,
    };

    Ok(Event {
        start_time: decode_time(&row.id, "start_time", &row.start_time)?,
        end_time: decode_time(&row.id, "end_time", &row.end_time)?,
        created_at: decode_time(&row.id, "created_at", &row.created_at)?,
        updated_at: decode_time(&row.id, "updated_at", &row.updated_at)?,
        id: row.id,
        external_id: row.external_id,
        remote_calendar_id: row.remote_calendar_id,
        title: row.title,
        is_all_day: row.is_all_day,
        calendar_ids,
        tag_ids,
        sync_status,
        local_version: row.local_version.max(0) as u64,
        conflict_copy,
        last_sync_error: row.last_sync_error,
    })
}

fn encode_list(values: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(values).map_err(|e| StoreError::QueryFailed(e.to_string()))
}

fn encode_conflict_copy(copy: Option<&ConflictCopy>) -> Result<Option<String>, StoreError> {
    copy.map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::QueryFailed(e.to_string()))
}

pub(crate) fn get_in(conn: &Connection, id: &str) -> Result<Option<Event>, StoreError> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id], read_event_row)
        .optional()?;
    row.map(decode_event).transpose()
}

pub(crate) fn require_in(conn: &Connection, id: &str) -> Result<Event, StoreError> {
    get_in(conn, id)?.ok_or_else(|| StoreError::NotFound {
        entity: "event",
        id: id.to_string(),
    })
}

pub(crate) fn find_by_external_id_in(
    conn: &Connection,
    external_id: &str,
) -> Result<Option<Event>, StoreError> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE external_id = ?1 LIMIT 1");
    let row = conn
        .query_row(&sql, params![external_id], read_event_row)
        .optional()?;
    row.map(decode_event).transpose()
}

fn query_events(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, read_event_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(decode_event).collect()
}

pub(crate) fn list_in(conn: &Connection) -> Result<Vec<Event>, StoreError> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY start_time, id");
    query_events(conn, &sql, [])
}

pub(crate) fn list_by_status_in(
    conn: &Connection,
    status: SyncStatus,
) -> Result<Vec<Event>, StoreError> {
    let sql =
        format!("SELECT {EVENT_COLUMNS} FROM events WHERE sync_status = ?1 ORDER BY created_at, id");
    query_events(conn, &sql, params![status.as_str()])
}

pub(crate) fn insert_in(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO events (id, external_id, remote_calendar_id, title, start_time, end_time,
             is_all_day, calendar_ids, tag_ids, sync_status, created_at, updated_at,
             local_version, conflict_copy, last_sync_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            event.id,
            event.external_id,
            event.remote_calendar_id,
            event.title,
            format_local(event.start_time),
            format_local(event.end_time),
            event.is_all_day,
            encode_list(&event.calendar_ids)?,
            encode_list(&event.tag_ids)?,
            event.sync_status.as_str(),
            format_local(event.created_at),
            format_local(event.updated_at),
            event.local_version as i64,
            encode_conflict_copy(event.conflict_copy.as_ref())?,
            event.last_sync_error,
        ],
    )?;
    Ok(())
}

/// Overwrite every column of an existing event.
pub(crate) fn replace_in(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE events SET external_id = ?2, remote_calendar_id = ?3, title = ?4,
             start_time = ?5, end_time = ?6, is_all_day = ?7, calendar_ids = ?8,
             tag_ids = ?9, sync_status = ?10, created_at = ?11, updated_at = ?12,
             local_version = ?13, conflict_copy = ?14, last_sync_error = ?15
         WHERE id = ?1",
        params![
            event.id,
            event.external_id,
            event.remote_calendar_id,
            event.title,
            format_local(event.start_time),
            format_local(event.end_time),
            event.is_all_day,
            encode_list(&event.calendar_ids)?,
            encode_list(&event.tag_ids)?,
            event.sync_status.as_str(),
            format_local(event.created_at),
            format_local(event.updated_at),
            event.local_version as i64,
            encode_conflict_copy(event.conflict_copy.as_ref())?,
            event.last_sync_error,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "event",
            id: event.id.clone(),
        });
    }
    Ok(())
}

pub(crate) fn delete_in(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let changed = conn.execute("DELETE FROM events WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

pub(crate) fn get_tag_in(conn: &Connection, id: &str) -> Result<Option<Tag>, StoreError> {
    let tag = conn
        .query_row(
            "SELECT id, name, calendar_id FROM tags WHERE id = ?1",
            params![id],
            |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    calendar_id: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(tag)
}

pub(crate) fn list_tags_in(conn: &Connection) -> Result<Vec<Tag>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, name, calendar_id FROM tags ORDER BY name, id")?;
    let tags = stmt
        .query_map([], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
                calendar_id: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

pub(crate) fn upsert_tag_in(conn: &Connection, tag: &Tag) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO tags (id, name, calendar_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, calendar_id = excluded.calendar_id",
        params![tag.id, tag.name, tag.calendar_id],
    )?;
    Ok(())
}

pub(crate) fn delete_tag_in(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let changed = conn.execute("DELETE FROM tags WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Calendars mapped by the given tags, in tag order, without duplicates.
pub(crate) fn calendars_for_tags_in(
    conn: &Connection,
    tag_ids: &[String],
) -> Result<Vec<String>, StoreError> {
    let mut calendars: Vec<String> = Vec::new();
    for tag_id in tag_ids {
        if let Some(calendar) = get_tag_in(conn, tag_id)?.and_then(|t| t.calendar_id) {
            if !calendars.contains(&calendar) {
                calendars.push(calendar);
            }
        }
    }
    Ok(calendars)
}
