use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::types::ActionSource;

/// Every store mutation and sync cycle produces a Notification.
/// UI layers subscribe to them; the engine never depends on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// Events were created, changed or removed.
    EventsUpdated {
        event_ids: Vec<String>,
        origin: ActionSource,
        at: DateTime<Utc>,
    },
    /// Tags or their calendar mappings changed.
    TagsUpdated {
        tag_ids: Vec<String>,
        at: DateTime<Utc>,
    },
    SyncStarted {
        at: DateTime<Utc>,
    },
    SyncFinished {
        applied: usize,
        failed: usize,
        skipped: usize,
        pulled: usize,
        conflicts: usize,
        at: DateTime<Utc>,
    },
    /// An event needs a manual decision between two versions.
    ConflictFlagged {
        event_id: String,
        at: DateTime<Utc>,
    },
    /// An event stopped syncing after a terminal failure.
    SyncFailed {
        event_id: String,
        message: String,
        at: DateTime<Utc>,
    },
}

impl Notification {
    /// Whether the notification reports a change of stored events.
    pub fn touches_events(&self) -> bool {
        matches!(
            self,
            Notification::EventsUpdated { .. }
                | Notification::ConflictFlagged { .. }
                | Notification::SyncFailed { .. }
        )
    }
}
