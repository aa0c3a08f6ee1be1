//! Domain entities kept in the local event store.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Storage and wire format of timezone-naive local times.
pub const LOCAL_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format a naive local time as `YYYY-MM-DDTHH:MM:SS`.
pub fn format_local(dt: NaiveDateTime) -> String {
    dt.format(LOCAL_TIME_FORMAT).to_string()
}

/// Parse a naive local time; fractional seconds are accepted and kept.
pub fn parse_local(s: &str) -> Option<NaiveDateTime> {
    s.trim().parse::<NaiveDateTime>().ok()
}

/// Remote calendar identifier.
pub type CalendarId = String;
/// Local tag identifier.
pub type TagId = String;

/// Synchronization state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// Never mirrored (e.g. an unsaved, in-progress entity).
    LocalOnly,
    /// Local changes not yet confirmed by the remote calendar.
    Pending,
    Synced,
    /// Both sides changed; the losing version is kept in `conflict_copy`.
    Conflict,
    /// A terminal remote failure; see `last_sync_error`.
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::LocalOnly => "local-only",
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local-only" => Some(SyncStatus::LocalOnly),
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "conflict" => Some(SyncStatus::Conflict),
            "error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side a version of an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Remote,
}

/// Losing version preserved when a conflict is flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictCopy {
    pub origin: Side,
    pub title: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub is_all_day: bool,
    pub updated_at: NaiveDateTime,
}

/// The entity being synchronized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Remote identifier, absent until the first successful create.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Calendar the remote copy lives in.
    #[serde(default)]
    pub remote_calendar_id: Option<CalendarId>,
    pub title: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub calendar_ids: Vec<CalendarId>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    pub sync_status: SyncStatus,
    pub created_at: NaiveDateTime,
    /// Last-write-wins clock.
    pub updated_at: NaiveDateTime,
    #[serde(default)]
    pub local_version: u64,
    #[serde(default)]
    pub conflict_copy: Option<ConflictCopy>,
    #[serde(default)]
    pub last_sync_error: Option<String>,
}

impl Event {
    /// Whether the user-visible content of two versions is identical.
    pub fn same_content(&self, other: &Event) -> bool {
        self.title == other.title
            && self.start_time == other.start_time
            && self.end_time == other.end_time
            && self.is_all_day == other.is_all_day
    }

    /// Whether the event carries any hint of where it must be mirrored.
    pub fn has_sync_target_hint(&self) -> bool {
        !self.calendar_ids.is_empty() || !self.tag_ids.is_empty()
    }

    pub(crate) fn to_conflict_copy(&self, origin: Side) -> ConflictCopy {
        ConflictCopy {
            origin,
            title: self.title.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            is_all_day: self.is_all_day,
            updated_at: self.updated_at,
        }
    }
}

/// A tag; its optional calendar mapping derives `calendar_ids` for tagged events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    #[serde(default)]
    pub calendar_id: Option<CalendarId>,
}

/// Input for creating an event through the event service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub calendar_ids: Vec<CalendarId>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    /// Keep the event out of the action log until it is published.
    #[serde(default)]
    pub local_only: bool,
}

/// Partial update of an event. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPatch {
    pub title: Option<String>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub is_all_day: Option<bool>,
    pub calendar_ids: Option<Vec<CalendarId>>,
    pub tag_ids: Option<Vec<TagId>>,
    pub sync_status: Option<SyncStatus>,
    pub external_id: Option<String>,
    pub remote_calendar_id: Option<CalendarId>,
    /// `Some(None)` clears the preserved copy.
    pub conflict_copy: Option<Option<ConflictCopy>>,
    /// `Some(None)` clears the error message.
    pub last_sync_error: Option<Option<String>>,
    /// Explicit LWW clock, used when applying remote versions.
    pub updated_at: Option<NaiveDateTime>,
}

impl EventPatch {
    /// Whether the patch touches user-visible content or sync targets.
    pub fn touches_content(&self) -> bool {
        self.title.is_some()
            || self.start_time.is_some()
            || self.end_time.is_some()
            || self.is_all_day.is_some()
            || self.calendar_ids.is_some()
            || self.tag_ids.is_some()
    }

    pub(crate) fn apply_to(&self, event: &mut Event) {
        if let Some(title) = &self.title {
            event.title = title.clone();
        }
        if let Some(start) = self.start_time {
            event.start_time = start;
        }
        if let Some(end) = self.end_time {
            event.end_time = end;
        }
        if let Some(all_day) = self.is_all_day {
            event.is_all_day = all_day;
        }
        if let Some(calendars) = &self.calendar_ids {
            event.calendar_ids = calendars.clone();
        }
        if let Some(tags) = &self.tag_ids {
            event.tag_ids = tags.clone();
        }
        if let Some(status) = self.sync_status {
            event.sync_status = status;
        }
        if let Some(external_id) = &self.external_id {
            event.external_id = Some(external_id.clone());
        }
        if let Some(calendar) = &self.remote_calendar_id {
            event.remote_calendar_id = Some(calendar.clone());
        }
        if let Some(copy) = &self.conflict_copy {
            event.conflict_copy = copy.clone();
        }
        if let Some(err) = &self.last_sync_error {
            event.last_sync_error = err.clone();
        }
        if let Some(updated_at) = self.updated_at {
            event.updated_at = updated_at;
        }
    }
}

/// How a user settles a flagged conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    /// Keep the event's current content.
    KeepCurrent,
    /// Restore the preserved losing copy.
    KeepPreserved,
}
