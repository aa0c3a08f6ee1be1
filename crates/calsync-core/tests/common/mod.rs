//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use calsync_core::model::{NewEvent, Tag};
use calsync_core::storage::{Config, Database};
use calsync_core::sync::{ManualClock, MemoryCalendar, SyncEngine};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub remote: Arc<MemoryCalendar>,
    pub clock: Arc<ManualClock>,
    pub db: Arc<Database>,
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.remote.calendars = vec!["C1".to_string()];
    config.sync.backoff_base_secs = 5;
    config.sync.backoff_cap_secs = 60;
    config
}

pub fn harness() -> Harness {
    harness_with(config(), Arc::new(Database::open_memory().unwrap()))
}

pub fn harness_with(config: Config, db: Arc<Database>) -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap(),
    ));
    let remote = Arc::new(MemoryCalendar::new(clock.clone()));
    let engine = Arc::new(SyncEngine::new(
        db.clone(),
        remote.clone(),
        clock.clone(),
        &config,
    ));
    Harness {
        engine,
        remote,
        clock,
        db,
    }
}

pub fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 9, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

pub fn event_in(calendar: &str, title: &str) -> NewEvent {
    NewEvent {
        title: title.to_string(),
        start_time: at(2, 10),
        end_time: at(2, 11),
        calendar_ids: vec![calendar.to_string()],
        ..Default::default()
    }
}

pub fn tagged(tag: &str, title: &str) -> NewEvent {
    NewEvent {
        title: title.to_string(),
        start_time: at(2, 10),
        end_time: at(2, 11),
        tag_ids: vec![tag.to_string()],
        ..Default::default()
    }
}

pub fn work_tag() -> Tag {
    Tag {
        id: "work".to_string(),
        name: "Work".to_string(),
        calendar_id: Some("C1".to_string()),
    }
}
