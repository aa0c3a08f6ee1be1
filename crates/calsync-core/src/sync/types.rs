//! Core types for the action log and sync cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action identifier: enqueue time in milliseconds plus a random suffix.
pub type ActionId = String;

/// Remote-side effect an action stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ActionType::Create),
            "update" => Some(ActionType::Update),
            "delete" => Some(ActionType::Delete),
            _ => None,
        }
    }
}

/// Kind of entity an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Event,
    Tag,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Event => "event",
            EntityType::Tag => "tag",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event" => Some(EntityType::Event),
            "tag" => Some(EntityType::Tag),
            _ => None,
        }
    }
}

/// Where the mutation behind an action originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    /// A local mutation through the event service.
    Local,
    /// Synthesized while reconciling a remote pull.
    Remote,
}

impl ActionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionSource::Local => "local",
            ActionSource::Remote => "remote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(ActionSource::Local),
            "remote" => Some(ActionSource::Remote),
            _ => None,
        }
    }
}

/// Synchronization outcome of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Pending,
    Synchronized,
    Failed,
}

/// One persisted entry of the action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    /// Monotonic log position.
    pub seq: i64,
    pub action_type: ActionType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub source: ActionSource,
    /// Entity snapshot at enqueue time.
    pub data: serde_json::Value,
    /// Baseline the change was made against, used for conflict detection.
    pub previous_data: Option<serde_json::Value>,
    /// Enqueue time.
    pub timestamp: DateTime<Utc>,
    pub synchronized: bool,
    /// Terminally failed; never retried automatically.
    pub failed: bool,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Backoff gate: the action is not due before this instant.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// A remote call for this action is outstanding.
    pub in_flight: bool,
}

impl Action {
    pub fn outcome(&self) -> ActionOutcome {
        if self.synchronized {
            ActionOutcome::Synchronized
        } else if self.failed {
            ActionOutcome::Failed
        } else {
            ActionOutcome::Pending
        }
    }

    pub fn is_retired(&self) -> bool {
        self.synchronized || self.failed
    }

    /// Pending, not in flight, and past its backoff gate.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_retired() && !self.in_flight && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Whether a newer local mutation may fold into this action.
    pub fn accepts_coalescing(&self) -> bool {
        !self.is_retired()
            && !self.in_flight
            && self.source == ActionSource::Local
            && matches!(self.action_type, ActionType::Create | ActionType::Update)
    }
}

/// Input for [`ActionLog::enqueue`](super::action_log::ActionLog::enqueue).
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub action_type: ActionType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub source: ActionSource,
    pub data: serde_json::Value,
    pub previous_data: Option<serde_json::Value>,
}

impl NewAction {
    pub fn local(
        action_type: ActionType,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        data: serde_json::Value,
        previous_data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            action_type,
            entity_type,
            entity_id: entity_id.into(),
            source: ActionSource::Local,
            data,
            previous_data,
        }
    }

    pub fn remote(
        action_type: ActionType,
        entity_id: impl Into<String>,
        data: serde_json::Value,
        previous_data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            action_type,
            entity_type: EntityType::Event,
            entity_id: entity_id.into(),
            source: ActionSource::Remote,
            data,
            previous_data,
        }
    }
}

/// Result of recording a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still pending; retried once the gate passes.
    Retrying {
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retry ceiling reached; the action is retired as failed.
    Exhausted { retry_count: u32 },
}

/// Row counts of the action log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogStats {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub synchronized: usize,
    pub failed: usize,
}

/// Phase of the current sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Draining,
    Applying,
    Reconciling,
}

/// Options for a single sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Pull remote changes after draining.
    pub pull: bool,
    /// Ignore backoff gates for this cycle.
    pub force_retry: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            pull: true,
            force_retry: false,
        }
    }
}

/// An error surfaced by a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub action_id: Option<ActionId>,
    pub entity_id: Option<String>,
    pub message: String,
    /// No further automatic retry will happen.
    pub terminal: bool,
}

/// Outcome counts of a sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Actions dispatched successfully.
    pub applied: usize,
    /// Actions that failed (transiently or terminally) this cycle.
    pub failed: usize,
    /// Actions left pending: no resolvable target, or event in conflict.
    pub skipped: usize,
    /// Actions left for the next cycle because the cycle budget ran out.
    pub deferred: usize,
    /// Remote changes pulled and reconciled.
    pub pulled: usize,
    /// Conflicts flagged during reconciliation.
    pub conflicts: usize,
    /// Another cycle was running; nothing was done.
    pub already_running: bool,
    pub errors: Vec<SyncFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncResult {
    pub(crate) fn already_running() -> Self {
        Self {
            already_running: true,
            ..Default::default()
        }
    }
}

/// Snapshot of the engine state for status displays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStatus {
    pub phase: SyncPhase,
    pub in_progress: bool,
    pub in_progress_since: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub online: bool,
    pub actions: ActionLogStats,
}
