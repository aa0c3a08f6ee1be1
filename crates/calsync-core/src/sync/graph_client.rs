//! Graph-style REST calendar client.
//!
//! Events live under `{base}/me/calendars/{calendar}/events`. Pulls use the
//! `calendarView/delta` endpoint; the final `@odata.deltaLink` is the cursor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::remote::{
    PullWindow, RemoteCalendar, RemoteChange, RemoteError, RemoteEvent, RemotePage, RemotePayload,
    TokenProvider,
};

const GRAPH_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Upper bound on followed `@odata.nextLink` pages in one pull.
const MAX_PAGES: usize = 200;

#[derive(Debug, Deserialize)]
struct GraphDateTime {
    #[serde(rename = "dateTime")]
    date_time: String,
}

#[derive(Debug, Deserialize)]
struct GraphEvent {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    start: Option<GraphDateTime>,
    #[serde(default)]
    end: Option<GraphDateTime>,
    #[serde(default, rename = "isAllDay")]
    is_all_day: bool,
    #[serde(default, rename = "lastModifiedDateTime")]
    last_modified: Option<DateTime<Utc>>,
    #[serde(default, rename = "transactionId")]
    transaction_id: Option<String>,
    #[serde(default, rename = "@removed")]
    removed: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DeltaPage {
    #[serde(default)]
    value: Vec<GraphEvent>,
    #[serde(default, rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(default, rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
}

/// Calendar client for a Microsoft Graph-compatible endpoint.
pub struct GraphCalendarClient {
    http: Client,
    base_url: String,
    time_zone: String,
    page_size: u32,
    token: Arc<dyn TokenProvider>,
    offset: Option<FixedOffset>,
}

impl GraphCalendarClient {
    pub fn new(
        base_url: &str,
        time_zone: &str,
        token: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            time_zone: time_zone.to_string(),
            page_size: 50,
            token,
            offset: None,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fixed offset used to convert `lastModifiedDateTime` to local time.
    /// Defaults to the host's local zone.
    pub fn with_local_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/me/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, remote_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(remote_id)
        )
    }

    fn delta_url(&self, calendar_id: &str, window: PullWindow) -> Result<Url, RemoteError> {
        let url = format!(
            "{}/me/calendars/{}/calendarView/delta",
            self.base_url,
            urlencoding::encode(calendar_id)
        );
        Url::parse_with_params(
            &url,
            &[
                (
                    "startDateTime",
                    window.start.format(GRAPH_TIME_FORMAT).to_string(),
                ),
                (
                    "endDateTime",
                    window.end.format(GRAPH_TIME_FORMAT).to_string(),
                ),
            ],
        )
        .map_err(|e| RemoteError::Rejected {
            status: 0,
            message: format!("invalid delta url: {e}"),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
        let token = self.token.access_token()?;
        Ok(request
            .bearer_auth(token)
            .header("Prefer", format!("outlook.timezone=\"{}\"", self.time_zone)))
    }

    fn body(&self, payload: &RemotePayload, with_transaction: bool) -> serde_json::Value {
        let mut body = json!({
            "subject": payload.title,
            "start": {
                "dateTime": payload.start_time.format(GRAPH_TIME_FORMAT).to_string(),
                "timeZone": self.time_zone,
            },
            "end": {
                "dateTime": payload.end_time.format(GRAPH_TIME_FORMAT).to_string(),
                "timeZone": self.time_zone,
            },
            "isAllDay": payload.is_all_day,
        });
        if with_transaction {
            body["transactionId"] = json!(payload.local_id);
        }
        body
    }

    fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self.offset {
            Some(offset) => at.with_timezone(&offset).naive_local(),
            None => at.with_timezone(&Local).naive_local(),
        }
    }

    fn convert(&self, calendar_id: &str, event: GraphEvent) -> Result<RemoteChange, RemoteError> {
        if event.removed.is_some() {
            return Ok(RemoteChange::Removed {
                remote_id: event.id,
            });
        }
        let start = parse_graph_time(event.start.as_ref(), "start")?;
        let end = parse_graph_time(event.end.as_ref(), "end")?;
        let last_modified = event
            .last_modified
            .map(|at| self.to_local(at))
            .unwrap_or(start);
        Ok(RemoteChange::Upserted(RemoteEvent {
            remote_id: event.id,
            calendar_id: calendar_id.to_string(),
            title: event.subject.unwrap_or_default(),
            start_time: start,
            end_time: end,
            is_all_day: event.is_all_day,
            last_modified,
            local_id: event.transaction_id.filter(|id| !id.is_empty()),
        }))
    }
}

fn parse_graph_time(value: Option<&GraphDateTime>, field: &str) -> Result<NaiveDateTime, RemoteError> {
    let value = value.ok_or_else(|| RemoteError::Decode(format!("missing {field}")))?;
    NaiveDateTime::parse_from_str(&value.date_time, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| RemoteError::Decode(format!("{field} {:?}: {e}", value.date_time)))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success response to a classified error.
async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let hint = retry_after(response.headers());
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text);
    Err(RemoteError::from_status(status.as_u16(), message, hint))
}

#[async_trait]
impl RemoteCalendar for GraphCalendarClient {
    fn name(&self) -> &str {
        "graph"
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        payload: &RemotePayload,
    ) -> Result<String, RemoteError> {
        let request = self
            .authorized(self.http.post(self.events_url(calendar_id)))?
            .json(&self.body(payload, true));
        let response = check(request.send().await?).await?;
        let created: CreatedEvent = response.json().await?;
        tracing::debug!(calendar_id, remote_id = %created.id, "Remote event created");
        Ok(created.id)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        remote_id: &str,
        payload: &RemotePayload,
    ) -> Result<(), RemoteError> {
        let request = self
            .authorized(self.http.patch(self.event_url(calendar_id, remote_id)))?
            .json(&self.body(payload, false));
        check(request.send().await?).await?;
        Ok(())
    }

    async fn delete_event(&self, calendar_id: &str, remote_id: &str) -> Result<(), RemoteError> {
        let request = self.authorized(self.http.delete(self.event_url(calendar_id, remote_id)))?;
        let response = request.send().await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        cursor: Option<&str>,
        window: PullWindow,
    ) -> Result<RemotePage, RemoteError> {
        let mut next = match cursor {
            Some(link) => link.to_string(),
            None => self.delta_url(calendar_id, window)?.to_string(),
        };
        let mut changes = Vec::new();

        for _ in 0..MAX_PAGES {
            let request = self
                .authorized(self.http.get(&next))?
                .header("Prefer", format!("odata.maxpagesize={}", self.page_size));
            let response = check(request.send().await?).await?;
            let page: DeltaPage = response
                .json()
                .await
                .map_err(|e| RemoteError::Decode(e.to_string()))?;

            for event in page.value {
                changes.push(self.convert(calendar_id, event)?);
            }

            match (page.next_link, page.delta_link) {
                (Some(link), _) => next = link,
                (None, delta) => {
                    return Ok(RemotePage {
                        changes,
                        cursor: delta,
                    })
                }
            }
        }

        Err(RemoteError::Decode(format!(
            "delta query exceeded {MAX_PAGES} pages"
        )))
    }
}
