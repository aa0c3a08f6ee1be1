//! Sync engine facade.
//!
//! Built from explicit dependencies (database, remote provider, clock,
//! configuration); there is no process-wide instance. Owns the scheduler loop
//! that runs a cycle on the periodic timer, on an offline→online transition
//! and on explicit request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;

use super::action_log::ActionLog;
use super::clock::Clock;
use super::event_service::EventService;
use super::orchestrator::{CycleState, Orchestrator};
use super::remote::RemoteCalendar;
use super::repair::{RepairReport, RepairScanner};
use super::types::{Action, EngineStatus, SyncOptions, SyncResult};
use crate::error::{EngineError, Result};
use crate::storage::database::{KV_LAST_SYNC_AT, KV_SYNC_IN_PROGRESS_SINCE};
use crate::storage::{Config, Database, SyncConfig};

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Action-log calendar sync engine.
pub struct SyncEngine {
    db: Arc<Database>,
    service: EventService,
    log: ActionLog,
    repair: RepairScanner,
    orchestrator: Orchestrator,
    state: Arc<CycleState>,
    config: SyncConfig,
    remote_name: String,
    online: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    trigger: Notify,
}

impl SyncEngine {
    pub fn new(
        db: Arc<Database>,
        remote: Arc<dyn RemoteCalendar>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let sync = config.sync.clone();
        let service = EventService::new(db.clone(), clock.clone());
        let log = ActionLog::new(db.clone(), clock.clone())
            .with_retry_policy(sync.max_retries, sync.backoff());
        let repair = RepairScanner::new(db.clone(), clock.clone(), service.clone(), log.clone())
            .with_default_calendar(sync.default_calendar_id.clone());
        let state = Arc::new(CycleState::default());
        let (online, online_rx) = watch::channel(true);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let remote_name = remote.name().to_string();

        let orchestrator = Orchestrator::new(
            db.clone(),
            log.clone(),
            service.clone(),
            remote,
            clock,
            sync.clone(),
            config.remote.calendars.clone(),
            state.clone(),
            online_rx,
            shutdown_rx,
        );

        Self {
            db,
            service,
            log,
            repair,
            orchestrator,
            state,
            config: sync,
            remote_name,
            online,
            shutdown,
            trigger: Notify::new(),
        }
    }

    /// Host-facing write path for events and tags.
    pub fn event_service(&self) -> &EventService {
        &self.service
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.log
    }

    /// Ask the scheduler loop for a cycle. Requests made while one is
    /// already pending collapse into it.
    pub fn trigger_sync(&self) {
        self.trigger.notify_one();
    }

    /// Run one cycle now.
    ///
    /// Returns a result with `already_running` set if another cycle is active.
    pub async fn perform_sync(&self, options: SyncOptions) -> Result<SyncResult> {
        if *self.shutdown.borrow() {
            return Err(EngineError::ShutDown.into());
        }
        self.orchestrator.perform(options).await
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.state.is_running()
    }

    pub fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .db
            .kv_get(KV_LAST_SYNC_AT)?
            .as_deref()
            .and_then(parse_rfc3339))
    }

    /// Read-only snapshot of the action log.
    pub fn action_queue(&self) -> Result<Vec<Action>> {
        Ok(self.log.queue()?)
    }

    pub fn status(&self) -> Result<EngineStatus> {
        Ok(EngineStatus {
            phase: self.state.phase(),
            in_progress: self.state.is_running(),
            in_progress_since: self.state.since(),
            last_sync_at: self.last_sync_time()?,
            online: self.is_online(),
            actions: self.log.stats()?,
        })
    }

    /// Run the repair scanner.
    pub fn repair(&self) -> Result<RepairReport> {
        Ok(self.repair.run()?)
    }

    /// Report connectivity. Going offline aborts in-flight remote calls;
    /// coming back online triggers a cycle.
    pub fn set_online(&self, online: bool) {
        let was = self.online.send_replace(online);
        if was != online {
            tracing::info!(online, "connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Clean up after a process that died mid-cycle.
    ///
    /// Returns when the interrupted cycle started, if there was one.
    pub fn recover_interrupted_cycle(&self) -> Result<Option<DateTime<Utc>>> {
        if self.state.is_running() {
            return Ok(None);
        }
        let Some(since) = self.db.kv_get(KV_SYNC_IN_PROGRESS_SINCE)? else {
            return Ok(None);
        };
        let released = self.log.recover_in_flight()?;
        self.db.kv_delete(KV_SYNC_IN_PROGRESS_SINCE)?;
        tracing::warn!(
            since = %since,
            released,
            "recovered from an interrupted sync cycle"
        );
        Ok(parse_rfc3339(&since))
    }

    /// Scheduler loop. Runs until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<()> {
        self.recover_interrupted_cycle()?;
        tracing::info!(
            remote = %self.remote_name,
            interval_secs = self.config.interval_secs,
            "sync scheduler started"
        );

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut online = self.online.subscribe();
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {}
                changed = online.changed() => {
                    if changed.is_err() || !*online.borrow_and_update() {
                        continue;
                    }
                    tracing::debug!("back online; starting a cycle");
                }
                _ = shutdown.changed() => {}
            }

            if *shutdown.borrow() {
                break;
            }
            if !self.is_online() {
                continue;
            }

            match self.perform_sync(SyncOptions::default()).await {
                Ok(result) if result.already_running => {
                    tracing::debug!("cycle skipped; another one is running");
                }
                Ok(_) => {}
                Err(e) => tracing::error!("sync cycle failed: {e}"),
            }
        }

        tracing::info!("sync scheduler stopped");
        Ok(())
    }

    /// Stop the scheduler after the current dispatch and abort in-flight calls.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.trigger.notify_one();
    }
}
