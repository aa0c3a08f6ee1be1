use clap::Subcommand;
use calsync_core::Tag;

use crate::common::{event_service, print_json, CliResult};

#[derive(Subcommand)]
pub enum TagAction {
    /// Create or replace a tag
    Set {
        /// Tag ID
        id: String,
        /// Display name
        name: String,
        /// Remote calendar events with this tag are mirrored to
        #[arg(long)]
        calendar: Option<String>,
    },
    /// Delete a tag
    Delete {
        /// Tag ID
        id: String,
    },
    /// List tags
    List {
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: TagAction) -> CliResult {
    let service = event_service()?;

    match action {
        TagAction::Set { id, name, calendar } => {
            let tag = service.upsert_tag(Tag {
                id,
                name,
                calendar_id: calendar,
            })?;
            println!("Tag saved: {}", tag.id);
        }
        TagAction::Delete { id } => {
            if !service.delete_tag(&id)? {
                return Err(format!("tag not found: {id}").into());
            }
            println!("Tag deleted: {id}");
        }
        TagAction::List { json } => {
            let tags = service.list_tags()?;
            if json {
                print_json(&tags)?;
            } else if tags.is_empty() {
                println!("No tags.");
            } else {
                for tag in &tags {
                    println!(
                        "{}  {}  -> {}",
                        tag.id,
                        tag.name,
                        tag.calendar_id.as_deref().unwrap_or("(unmapped)")
                    );
                }
            }
        }
    }
    Ok(())
}
