//! Which remote calendar an event is mirrored to.

use rusqlite::Connection;

use crate::error::StoreError;
use crate::model::Event;
use crate::storage::event_store::calendars_for_tags_in;

/// Calendars for an event with no explicit `calendar_ids`: the tag mappings,
/// else the default calendar, else nothing.
pub(crate) fn derive_calendar_ids_in(
    conn: &Connection,
    tag_ids: &[String],
    default_calendar: Option<&str>,
) -> Result<Vec<String>, StoreError> {
    let mapped = calendars_for_tags_in(conn, tag_ids)?;
    if !mapped.is_empty() {
        return Ok(mapped);
    }
    Ok(default_calendar
        .filter(|c| !c.is_empty())
        .map(|c| vec![c.to_string()])
        .unwrap_or_default())
}

/// Calendar a create/update for `event` is sent to, or `None` when the event is
/// not yet actionable.
///
/// The calendar already holding the remote copy wins, then the first explicit
/// calendar, then the derived mapping.
pub(crate) fn resolve_target_calendar_in(
    conn: &Connection,
    event: &Event,
    default_calendar: Option<&str>,
) -> Result<Option<String>, StoreError> {
    if let Some(calendar) = event.remote_calendar_id.as_ref().filter(|c| !c.is_empty()) {
        return Ok(Some(calendar.clone()));
    }
    if let Some(calendar) = event.calendar_ids.iter().find(|c| !c.is_empty()) {
        return Ok(Some(calendar.clone()));
    }
    Ok(derive_calendar_ids_in(conn, &event.tag_ids, default_calendar)?
        .into_iter()
        .next())
}
