//! In-process calendar provider for tests and dry runs.
//!
//! Keeps events per calendar, a change feed for cursor-based pulls, and a log
//! of every call. Failures, latency and connectivity can be injected.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::clock::Clock;
use super::remote::{
    PullWindow, RemoteCalendar, RemoteChange, RemoteError, RemoteEvent, RemotePage, RemotePayload,
};

/// A call received by [`MemoryCalendar`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Create { calendar_id: String, remote_id: String },
    Update { calendar_id: String, remote_id: String },
    Delete { calendar_id: String, remote_id: String },
    List { calendar_id: String, cursor: Option<String> },
}

#[derive(Default)]
struct MemoryState {
    calendars: HashMap<String, BTreeMap<String, RemoteEvent>>,
    feeds: HashMap<String, Vec<RemoteChange>>,
    failures: VecDeque<RemoteError>,
    lost_responses: VecDeque<RemoteError>,
    calls: Vec<RemoteCall>,
    next_id: u64,
    latency: Option<Duration>,
}

/// In-memory [`RemoteCalendar`].
pub struct MemoryCalendar {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
    online: AtomicBool,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct ActiveCall<'a> {
    active: &'a AtomicUsize,
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryCalendar {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
            online: AtomicBool::new(true),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Fail the next call with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, err: RemoteError) {
        self.lock().failures.push_back(err);
    }

    /// Let the next write land, then report `err` to the caller as if the
    /// response had been lost in transit.
    pub fn lose_next_response(&self, err: RemoteError) {
        self.lock().lost_responses.push_back(err);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Calls that mutate remote state.
    pub fn write_calls(&self) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, RemoteCall::List { .. }))
            .collect()
    }

    /// Highest number of calls observed in progress at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn events(&self, calendar_id: &str) -> Vec<RemoteEvent> {
        self.lock()
            .calendars
            .get(calendar_id)
            .map(|events| events.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, calendar_id: &str, remote_id: &str) -> Option<RemoteEvent> {
        self.lock()
            .calendars
            .get(calendar_id)
            .and_then(|events| events.get(remote_id).cloned())
    }

    /// Simulate an edit made directly on the provider.
    pub fn remote_edit(
        &self,
        calendar_id: &str,
        remote_id: &str,
        title: &str,
        last_modified: NaiveDateTime,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        let event = state
            .calendars
            .get_mut(calendar_id)
            .and_then(|events| events.get_mut(remote_id))
            .ok_or(RemoteError::NotFound)?;
        event.title = title.to_string();
        event.last_modified = last_modified;
        let change = RemoteChange::Upserted(event.clone());
        state
            .feeds
            .entry(calendar_id.to_string())
            .or_default()
            .push(change);
        Ok(())
    }

    /// Simulate an event created directly on the provider. Returns its remote id.
    pub fn remote_insert(&self, calendar_id: &str, payload: &RemotePayload) -> String {
        let mut state = self.lock();
        let now = self.clock.local_now();
        Self::insert_locked(&mut state, calendar_id, payload, now, false)
    }

    /// Simulate a deletion made directly on the provider.
    pub fn remote_delete(&self, calendar_id: &str, remote_id: &str) -> bool {
        let mut state = self.lock();
        let removed = state
            .calendars
            .get_mut(calendar_id)
            .and_then(|events| events.remove(remote_id))
            .is_some();
        if removed {
            state
                .feeds
                .entry(calendar_id.to_string())
                .or_default()
                .push(RemoteChange::Removed {
                    remote_id: remote_id.to_string(),
                });
        }
        removed
    }

    fn insert_locked(
        state: &mut MemoryState,
        calendar_id: &str,
        payload: &RemotePayload,
        now: NaiveDateTime,
        echo_local_id: bool,
    ) -> String {
        state.next_id += 1;
        let remote_id = format!("mem-{}", state.next_id);
        let event = RemoteEvent {
            remote_id: remote_id.clone(),
            calendar_id: calendar_id.to_string(),
            title: payload.title.clone(),
            start_time: payload.start_time,
            end_time: payload.end_time,
            is_all_day: payload.is_all_day,
            last_modified: now,
            local_id: echo_local_id.then(|| payload.local_id.clone()),
        };
        state
            .calendars
            .entry(calendar_id.to_string())
            .or_default()
            .insert(remote_id.clone(), event.clone());
        state
            .feeds
            .entry(calendar_id.to_string())
            .or_default()
            .push(RemoteChange::Upserted(event));
        remote_id
    }

    /// Common entry of every call: latency, connectivity, injected failures.
    async fn enter(&self, call: RemoteCall) -> Result<ActiveCall<'_>, RemoteError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let guard = ActiveCall {
            active: &self.active,
        };

        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.calls.push(call);
        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Offline);
        }
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        Ok(guard)
    }
}

#[async_trait]
impl RemoteCalendar for MemoryCalendar {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        payload: &RemotePayload,
    ) -> Result<String, RemoteError> {
        let next_id = self.lock().next_id + 1;
        let _active = self
            .enter(RemoteCall::Create {
                calendar_id: calendar_id.to_string(),
                remote_id: format!("mem-{next_id}"),
            })
            .await?;
        let now = self.clock.local_now();
        let mut state = self.lock();
        let remote_id = Self::insert_locked(&mut state, calendar_id, payload, now, true);
        match state.lost_responses.pop_front() {
            Some(err) => Err(err),
            None => Ok(remote_id),
        }
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        remote_id: &str,
        payload: &RemotePayload,
    ) -> Result<(), RemoteError> {
        let _active = self
            .enter(RemoteCall::Update {
                calendar_id: calendar_id.to_string(),
                remote_id: remote_id.to_string(),
            })
            .await?;
        let now = self.clock.local_now();
        let mut state = self.lock();
        let event = state
            .calendars
            .get_mut(calendar_id)
            .and_then(|events| events.get_mut(remote_id))
            .ok_or(RemoteError::NotFound)?;
        event.title = payload.title.clone();
        event.start_time = payload.start_time;
        event.end_time = payload.end_time;
        event.is_all_day = payload.is_all_day;
        event.last_modified = now;
        let change = RemoteChange::Upserted(event.clone());
        state
            .feeds
            .entry(calendar_id.to_string())
            .or_default()
            .push(change);
        match state.lost_responses.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delete_event(&self, calendar_id: &str, remote_id: &str) -> Result<(), RemoteError> {
        let _active = self
            .enter(RemoteCall::Delete {
                calendar_id: calendar_id.to_string(),
                remote_id: remote_id.to_string(),
            })
            .await?;
        let mut state = self.lock();
        state
            .calendars
            .get_mut(calendar_id)
            .and_then(|events| events.remove(remote_id))
            .ok_or(RemoteError::NotFound)?;
        state
            .feeds
            .entry(calendar_id.to_string())
            .or_default()
            .push(RemoteChange::Removed {
                remote_id: remote_id.to_string(),
            });
        Ok(())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        cursor: Option<&str>,
        window: PullWindow,
    ) -> Result<RemotePage, RemoteError> {
        let _active = self
            .enter(RemoteCall::List {
                calendar_id: calendar_id.to_string(),
                cursor: cursor.map(str::to_string),
            })
            .await?;
        let state = self.lock();
        let feed = state.feeds.get(calendar_id).map(Vec::as_slice).unwrap_or(&[]);
        let position = cursor.and_then(|c| c.parse::<usize>().ok());

        let changes = match position {
            Some(from) => feed.get(from..).unwrap_or(&[]).to_vec(),
            None => state
                .calendars
                .get(calendar_id)
                .map(|events| {
                    events
                        .values()
                        .filter(|e| window.contains(e.start_time))
                        .cloned()
                        .map(RemoteChange::Upserted)
                        .collect()
                })
                .unwrap_or_default(),
        };
        Ok(RemotePage {
            changes,
            cursor: Some(feed.len().to_string()),
        })
    }
}
