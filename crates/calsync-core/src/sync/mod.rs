//! Action-log calendar synchronization.
//!
//! Local mutations go through the [`EventService`], which records an action
//! for each of them. The [`SyncEngine`] drains the [`ActionLog`] against a
//! [`RemoteCalendar`], pulls remote changes back, and resolves conflicts with
//! last-write-wins.

pub mod action_log;
pub mod backoff;
mod calendar_mapping;
pub mod clock;
pub mod conflict_resolver;
pub mod engine;
pub mod event_codec;
pub mod event_service;
pub mod graph_client;
pub mod memory;
pub mod orchestrator;
pub mod remote;
pub mod repair;
pub mod types;

#[cfg(test)]
mod event_codec_tests;
#[cfg(test)]
mod types_tests;

pub use action_log::ActionLog;
pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict_resolver::{resolve, Resolution};
pub use engine::SyncEngine;
pub use event_service::EventService;
pub use graph_client::GraphCalendarClient;
pub use memory::{MemoryCalendar, RemoteCall};
pub use remote::{
    EnvToken, FailureKind, PullWindow, RemoteCalendar, RemoteChange, RemoteError, RemoteEvent,
    RemotePage, RemotePayload, StaticToken, TokenProvider,
};
pub use repair::{RepairReport, RepairScanner};
pub use types::{
    Action, ActionId, ActionLogStats, ActionOutcome, ActionSource, ActionType, EngineStatus,
    EntityType, FailureOutcome, NewAction, SyncFailure, SyncOptions, SyncPhase, SyncResult,
};
