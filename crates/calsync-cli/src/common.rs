//! Wiring shared by the subcommands.

use std::sync::Arc;

use calsync_core::sync::{Clock, EnvToken, GraphCalendarClient, SystemClock, TokenProvider};
use calsync_core::{Config, Database, EngineError, EventService, SyncEngine};
use chrono::NaiveDateTime;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

pub fn event_service() -> CliResult<EventService> {
    let db = Arc::new(Database::open()?);
    Ok(EventService::new(db, clock()))
}

/// Build the engine against the configured provider.
///
/// With `require_token` set, a missing access token fails here instead of on
/// the first remote call.
pub fn engine(require_token: bool) -> CliResult<SyncEngine> {
    let config = Config::load()?;
    let token = EnvToken::new(config.remote.token_env.clone());
    if require_token && token.access_token().is_err() {
        return Err(EngineError::MissingToken(format!(
            "set {} to a provider access token",
            config.remote.token_env
        ))
        .into());
    }

    let remote = GraphCalendarClient::new(
        &config.remote.base_url,
        &config.remote.time_zone,
        Arc::new(token),
        config.sync.remote_timeout(),
    )?
    .with_page_size(config.remote.page_size);

    let db = Arc::new(Database::open()?);
    Ok(SyncEngine::new(db, Arc::new(remote), clock(), &config))
}

/// Parse `YYYY-MM-DDTHH:MM[:SS]` as a naive local time.
pub fn parse_time(value: &str) -> CliResult<NaiveDateTime> {
    if let Some(dt) = calsync_core::model::parse_local(value) {
        return Ok(dt);
    }
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M")
        .map_err(|_| format!("invalid time '{value}' (expected YYYY-MM-DDTHH:MM)").into())
}

/// Split a comma-separated list, dropping empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
