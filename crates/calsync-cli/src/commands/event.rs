//! Event commands. Every mutation records its action for the next sync.

use clap::{Subcommand, ValueEnum};
use calsync_core::{ConflictChoice, Event, EventPatch, NewEvent, SyncStatus};

use crate::common::{event_service, parse_time, print_json, split_list, CliResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum Keep {
    /// Keep the version that won last-write-wins
    Current,
    /// Restore the preserved losing version
    Preserved,
}

impl From<Keep> for ConflictChoice {
    fn from(keep: Keep) -> Self {
        match keep {
            Keep::Current => ConflictChoice::KeepCurrent,
            Keep::Preserved => ConflictChoice::KeepPreserved,
        }
    }
}

#[derive(Subcommand)]
pub enum EventAction {
    /// Create an event
    Create {
        /// Event title
        title: String,
        /// Start time (YYYY-MM-DDTHH:MM)
        #[arg(long)]
        start: String,
        /// End time (YYYY-MM-DDTHH:MM)
        #[arg(long)]
        end: String,
        /// All-day event
        #[arg(long)]
        all_day: bool,
        /// Comma-separated target calendar ids
        #[arg(long)]
        calendars: Option<String>,
        /// Comma-separated tag ids
        #[arg(long)]
        tags: Option<String>,
        /// Keep the event on this device only
        #[arg(long)]
        local_only: bool,
    },
    /// Update an event
    Update {
        /// Event ID
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        all_day: Option<bool>,
        /// Comma-separated target calendar ids
        #[arg(long)]
        calendars: Option<String>,
        /// Comma-separated tag ids
        #[arg(long)]
        tags: Option<String>,
    },
    /// Delete an event
    Delete {
        /// Event ID
        id: String,
    },
    /// List events
    List {
        /// Filter by sync status (local-only, pending, synced, conflict, error)
        #[arg(long)]
        status: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one event as JSON
    Show {
        /// Event ID
        id: String,
    },
    /// Start syncing a local-only event
    Publish {
        /// Event ID
        id: String,
    },
    /// Settle a flagged conflict
    Resolve {
        /// Event ID
        id: String,
        /// Version to keep
        #[arg(long, value_enum)]
        keep: Keep,
    },
}

fn print_row(event: &Event) {
    println!(
        "{}  {:<10}  {} -> {}  {}",
        event.id,
        event.sync_status.as_str(),
        event.start_time.format("%Y-%m-%d %H:%M"),
        event.end_time.format("%H:%M"),
        event.title
    );
}

pub fn run(action: EventAction) -> CliResult {
    let service = event_service()?;

    match action {
        EventAction::Create {
            title,
            start,
            end,
            all_day,
            calendars,
            tags,
            local_only,
        } => {
            let event = service.create_event(NewEvent {
                title,
                start_time: parse_time(&start)?,
                end_time: parse_time(&end)?,
                is_all_day: all_day,
                calendar_ids: calendars.as_deref().map(split_list).unwrap_or_default(),
                tag_ids: tags.as_deref().map(split_list).unwrap_or_default(),
                local_only,
            })?;
            println!("Event created: {}", event.id);
            print_json(&event)?;
        }
        EventAction::Update {
            id,
            title,
            start,
            end,
            all_day,
            calendars,
            tags,
        } => {
            let patch = EventPatch {
                title,
                start_time: start.as_deref().map(parse_time).transpose()?,
                end_time: end.as_deref().map(parse_time).transpose()?,
                is_all_day: all_day,
                calendar_ids: calendars.as_deref().map(split_list),
                tag_ids: tags.as_deref().map(split_list),
                ..Default::default()
            };
            if !patch.touches_content() {
                return Err("nothing to update".into());
            }
            let event = service.update_event(&id, patch, false)?;
            println!("Event updated: {}", event.id);
        }
        EventAction::Delete { id } => {
            if service.delete_event(&id)? {
                println!("Event deleted: {id}");
            } else {
                return Err(format!("event not found: {id}").into());
            }
        }
        EventAction::List { status, json } => {
            let status = status
                .map(|s| SyncStatus::parse(&s).ok_or(format!("unknown status: {s}")))
                .transpose()?;
            let events: Vec<Event> = service
                .get_all_events()?
                .into_iter()
                .filter(|e| status.map_or(true, |s| e.sync_status == s))
                .collect();
            if json {
                print_json(&events)?;
            } else if events.is_empty() {
                println!("No events.");
            } else {
                events.iter().for_each(print_row);
            }
        }
        EventAction::Show { id } => match service.get_event_by_id(&id)? {
            Some(event) => print_json(&event)?,
            None => return Err(format!("event not found: {id}").into()),
        },
        EventAction::Publish { id } => {
            let event = service.publish_event(&id)?;
            println!("Event published: {}", event.id);
        }
        EventAction::Resolve { id, keep } => {
            let event = service.resolve_conflict(&id, keep.into())?;
            println!("Conflict resolved: {} ({})", event.id, event.title);
        }
    }
    Ok(())
}
