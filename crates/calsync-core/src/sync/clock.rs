//! Injected time source.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Local, NaiveDateTime, Timelike, Utc};

/// Source of "now" for the engine.
///
/// Action timestamps and backoff gates use UTC; event `updated_at` values are
/// timezone-naive local times.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current naive local time, truncated to whole seconds.
    fn local_now(&self) -> NaiveDateTime {
        let now = self.now().with_timezone(&Local).naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
///
/// `local_now` reports the UTC time as naive local time so results do not
/// depend on the host time zone.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn local_now(&self) -> NaiveDateTime {
        let now = self.now().naive_utc();
        now.with_nanosecond(0).unwrap_or(now)
    }
}
