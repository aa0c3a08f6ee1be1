//! Sync subcommand.
//!
//! Runs cycles against the configured provider and inspects the action log.

use clap::Subcommand;
use calsync_core::sync::{Action, SyncOptions};

use crate::common::{engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Run one sync cycle now
    Run {
        /// Only push local changes; skip pulling remote ones
        #[arg(long)]
        no_pull: bool,
        /// Ignore retry backoff for this cycle
        #[arg(long)]
        force: bool,
        /// Print the cycle result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the action log
    Queue {
        /// Include retired actions
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show engine status
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Scan for and fix inconsistencies between events and the action log
    Repair {
        #[arg(long)]
        json: bool,
    },
}

fn print_action(action: &Action) {
    let state = if action.in_flight {
        "in-flight".to_string()
    } else if action.failed {
        "failed".to_string()
    } else if action.synchronized {
        "done".to_string()
    } else if action.retry_count > 0 {
        format!("retry {}", action.retry_count)
    } else {
        "pending".to_string()
    };
    println!(
        "{:>5}  {:<6} {:<5} {:<6} {}  [{}]",
        action.seq,
        action.source.as_str(),
        action.entity_type.as_str(),
        action.action_type.as_str(),
        action.entity_id,
        state
    );
    if let Some(err) = &action.last_error {
        println!("       {err}");
    }
}

pub fn run(action: SyncAction) -> CliResult {
    match action {
        SyncAction::Run {
            no_pull,
            force,
            json,
        } => {
            let engine = engine(true)?;
            engine.recover_interrupted_cycle()?;
            let runtime = tokio::runtime::Runtime::new()?;
            let result = runtime.block_on(engine.perform_sync(SyncOptions {
                pull: !no_pull,
                force_retry: force,
            }))?;

            if json {
                print_json(&result)?;
            } else {
                println!(
                    "Applied {}, failed {}, skipped {}, deferred {}, pulled {}, conflicts {}",
                    result.applied,
                    result.failed,
                    result.skipped,
                    result.deferred,
                    result.pulled,
                    result.conflicts
                );
                for failure in &result.errors {
                    let kind = if failure.terminal { "terminal" } else { "retrying" };
                    eprintln!("  {kind}: {}", failure.message);
                }
            }
        }
        SyncAction::Queue { all, json } => {
            let engine = engine(false)?;
            let actions: Vec<Action> = engine
                .action_queue()?
                .into_iter()
                .filter(|a| all || !a.is_retired())
                .collect();
            if json {
                print_json(&actions)?;
            } else if actions.is_empty() {
                println!("Action log is empty.");
            } else {
                actions.iter().for_each(print_action);
            }
        }
        SyncAction::Status { json } => {
            let engine = engine(false)?;
            let status = engine.status()?;
            if json {
                print_json(&status)?;
            } else {
                let last = status
                    .last_sync_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!("Last sync: {last}");
                println!(
                    "Actions: {} pending, {} failed, {} done",
                    status.actions.pending, status.actions.failed, status.actions.synchronized
                );
                if let Some(since) = status.in_progress_since {
                    println!("Cycle in progress since {}", since.to_rfc3339());
                }
            }
        }
        SyncAction::Repair { json } => {
            let engine = engine(false)?;
            let report = engine.repair()?;
            if json {
                print_json(&report)?;
            } else {
                println!("{}", report.message());
            }
        }
    }
    Ok(())
}
