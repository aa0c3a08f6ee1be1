//! # calsync core library
//!
//! Keeps a local event store consistent with a remote calendar provider under
//! unreliable connectivity. Every local mutation is recorded in a persistent
//! action log; sync cycles drain it against the provider, pull remote changes
//! back and resolve conflicts with last-write-wins.
//!
//! ## Architecture
//!
//! - **Storage**: SQLite event store, tag mappings and action log behind one
//!   connection, plus TOML configuration
//! - **Event service**: the only writer of local mutations; records the
//!   matching action in the same transaction
//! - **Sync engine**: scheduler, orchestrator, conflict resolver and repair
//!   scanner over a pluggable [`RemoteCalendar`]
//!
//! ## Key Components
//!
//! - [`SyncEngine`]: explicit engine instance built from injected dependencies
//! - [`EventService`]: host-facing create/update/delete of events and tags
//! - [`ActionLog`]: ordered queue of outstanding remote work
//! - [`Database`]: SQLite persistence
//! - [`Config`]: engine configuration

pub mod error;
pub mod events;
pub mod model;
pub mod storage;
pub mod sync;

pub use error::{ConfigError, CoreError, EngineError, StoreError, ValidationError};
pub use events::Notification;
pub use model::{ConflictChoice, Event, EventPatch, NewEvent, SyncStatus, Tag};
pub use storage::{Config, Database};
pub use sync::{
    ActionLog, EventService, GraphCalendarClient, MemoryCalendar, RemoteCalendar, RemoteError,
    SyncEngine, SyncOptions, SyncResult,
};
