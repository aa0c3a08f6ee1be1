//! Remote calendar provider contract.
//!
//! Provider calls are not idempotent: a create sent twice makes two remote
//! events. The action log is the idempotency boundary, so the engine never
//! dispatches the same action twice concurrently.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Content sent to the provider on create/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePayload {
    pub title: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub is_all_day: bool,
    /// Local event id, echoed back by providers that support it.
    pub local_id: String,
}

/// An event as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub remote_id: String,
    pub calendar_id: String,
    pub title: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub is_all_day: bool,
    /// Last modification, converted to naive local time.
    pub last_modified: NaiveDateTime,
    /// Local id if the event was created by this engine.
    #[serde(default)]
    pub local_id: Option<String>,
}

/// One entry of a remote change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteChange {
    Upserted(RemoteEvent),
    Removed { remote_id: String },
}

/// Changes since a cursor, plus the cursor to resume from next time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemotePage {
    pub changes: Vec<RemoteChange>,
    pub cursor: Option<String>,
}

/// Time window, in naive local time, a full pull is limited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl PullWindow {
    /// `days` before and after `now`.
    pub fn around(now: NaiveDateTime, days: u32) -> Self {
        let span = chrono::Duration::days(i64::from(days));
        Self {
            start: now - span,
            end: now + span,
        }
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        at >= self.start && at <= self.end
    }
}

/// How the engine treats a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retried with backoff.
    Transient,
    /// Retired; the event is marked `error`.
    Terminal,
}

/// Remote provider errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("Offline")]
    Offline,

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote event not found")]
    NotFound,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Payload rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid provider response: {0}")]
    Decode(String),

    #[error("Cancelled by shutdown")]
    Cancelled,
}

impl RemoteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RemoteError::Offline
            | RemoteError::Timeout(_)
            | RemoteError::RateLimited { .. }
            | RemoteError::Server { .. }
            | RemoteError::Network(_)
            | RemoteError::Cancelled => FailureKind::Transient,
            RemoteError::NotFound
            | RemoteError::Unauthorized
            | RemoteError::Forbidden(_)
            | RemoteError::Rejected { .. }
            | RemoteError::Decode(_) => FailureKind::Terminal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Provider hint for the earliest retry.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            401 => RemoteError::Unauthorized,
            403 => RemoteError::Forbidden(message),
            404 | 410 => RemoteError::NotFound,
            408 => RemoteError::Timeout(Duration::ZERO),
            429 => RemoteError::RateLimited { retry_after },
            500..=599 => RemoteError::Server { status, message },
            _ => RemoteError::Rejected { status, message },
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::from_status(status.as_u16(), err.to_string(), None)
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

/// Opaque source of bearer tokens; the OAuth flow lives elsewhere.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Result<String, RemoteError>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Result<String, RemoteError> {
        Ok(self.0.clone())
    }
}

/// Token read from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenProvider for EnvToken {
    fn access_token(&self) -> Result<String, RemoteError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(RemoteError::Unauthorized),
        }
    }
}

/// Calendar provider operations used by the sync engine.
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Create an event and return its remote id.
    async fn create_event(
        &self,
        calendar_id: &str,
        payload: &RemotePayload,
    ) -> Result<String, RemoteError>;

    async fn update_event(
        &self,
        calendar_id: &str,
        remote_id: &str,
        payload: &RemotePayload,
    ) -> Result<(), RemoteError>;

    async fn delete_event(&self, calendar_id: &str, remote_id: &str) -> Result<(), RemoteError>;

    /// Changes since `cursor`, or every event inside `window` when there is no cursor.
    async fn list_events(
        &self,
        calendar_id: &str,
        cursor: Option<&str>,
        window: PullWindow,
    ) -> Result<RemotePage, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn status_classification() {
        let cases = [
            (401, FailureKind::Terminal),
            (403, FailureKind::Terminal),
            (404, FailureKind::Terminal),
            (400, FailureKind::Terminal),
            (422, FailureKind::Terminal),
            (408, FailureKind::Transient),
            (429, FailureKind::Transient),
            (500, FailureKind::Transient),
            (503, FailureKind::Transient),
        ];
        for (status, kind) in cases {
            assert_eq!(RemoteError::from_status(status, "x", None).kind(), kind, "{status}");
        }
    }

    #[test]
    fn offline_and_timeout_are_transient() {
        assert!(RemoteError::Offline.is_transient());
        assert!(RemoteError::Timeout(Duration::from_secs(15)).is_transient());
        assert!(!RemoteError::Decode("bad".into()).is_transient());
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = RemoteError::from_status(429, "slow down", Some(Duration::from_secs(30)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(RemoteError::NotFound.retry_after(), None);
    }

    #[test]
    fn pull_window_is_symmetric() {
        let now = NaiveDate::from_ymd_opt(2025, 6, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let window = PullWindow::around(now, 30);
        assert_eq!((now - window.start).num_days(), 30);
        assert_eq!((window.end - now).num_days(), 30);
        assert!(window.contains(now));
        assert!(!window.contains(now + chrono::Duration::days(31)));
    }

    #[test]
    fn static_token() {
        assert_eq!(StaticToken("abc".into()).access_token().unwrap(), "abc");
    }

    #[test]
    fn missing_env_token_is_unauthorized() {
        let provider = EnvToken::new("CALSYNC_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(matches!(
            provider.access_token(),
            Err(RemoteError::Unauthorized)
        ));
    }
}
