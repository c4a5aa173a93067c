//! HTTP calendar client for a Google Calendar-shaped REST API.
//!
//! Only the handful of endpoints the booking engine needs: event
//! listing within a range, create, patch, delete, and lookup by the
//! private identity property.  The base URL is configurable so tests
//! can point the client at a local mock server.

use chrono::SecondsFormat;
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::debug;

use super::{CalendarError, CalendarPort, EventDraft, IDENTITY_PROPERTY};
use crate::booking::IdentityKey;
use crate::schedule::{parse_instant, TimeWindow};

/// Client for a remote calendar backend.
pub struct RemoteCalendar {
    base_url: String,
    calendar_id: String,
    api_token: String,
    tz: Tz,
    client: Client,
}

impl RemoteCalendar {
    /// `api_token` may be empty when the backend needs no auth (mock
    /// servers, local emulators).
    pub fn new(
        base_url: impl Into<String>,
        calendar_id: impl Into<String>,
        api_token: impl Into<String>,
        tz: Tz,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            calendar_id: calendar_id.into(),
            api_token: api_token.into(),
            tz,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/{}/events", self.base_url, self.calendar_id)
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), event_id)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_token)
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, CalendarError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(CalendarError::Api {
            status: status.as_u16(),
            body,
        })
    }

    fn window_body(window: &TimeWindow, tz: &Tz) -> serde_json::Value {
        json!({
            "start": {
                "dateTime": window.start().to_rfc3339_opts(SecondsFormat::Secs, false),
                "timeZone": tz.name(),
            },
            "end": {
                "dateTime": window.end().to_rfc3339_opts(SecondsFormat::Secs, false),
                "timeZone": tz.name(),
            },
        })
    }
}

#[async_trait::async_trait]
impl CalendarPort for RemoteCalendar {
    async fn list_busy(&self, window: &TimeWindow) -> Result<Vec<TimeWindow>, CalendarError> {
        let resp = self
            .authed(self.client.get(self.events_url()))
            .query(&[
                ("timeMin", window.start().to_rfc3339()),
                ("timeMax", window.end().to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await?;
        let body: serde_json::Value = Self::check(resp).await?.json().await?;

        let mut busy = Vec::new();
        let items = body["items"].as_array().cloned().unwrap_or_default();
        for item in items {
            // All-day events carry `date` instead of `dateTime`; they do
            // not block time slots here.
            let (Some(start), Some(end)) = (
                item["start"]["dateTime"].as_str(),
                item["end"]["dateTime"].as_str(),
            ) else {
                continue;
            };
            let start = parse_instant(start, self.tz)
                .map_err(|e| CalendarError::Decode(e.to_string()))?;
            let end =
                parse_instant(end, self.tz).map_err(|e| CalendarError::Decode(e.to_string()))?;
            let win =
                TimeWindow::new(start, end).map_err(|e| CalendarError::Decode(e.to_string()))?;
            busy.push(win);
        }
        debug!(count = busy.len(), "busy intervals fetched");
        Ok(busy)
    }

    async fn create_event(&self, draft: &EventDraft) -> Result<String, CalendarError> {
        let mut body = Self::window_body(&draft.window, &self.tz);
        body["summary"] = json!(draft.summary);
        body["description"] = json!(draft.description);
        body["attendees"] = json!(draft
            .attendees
            .iter()
            .map(|email| json!({ "email": email }))
            .collect::<Vec<_>>());
        body["extendedProperties"] = json!({
            "private": { IDENTITY_PROPERTY: draft.identity.property_value() }
        });

        let resp = self
            .authed(self.client.post(self.events_url()))
            .json(&body)
            .send()
            .await?;
        let created: serde_json::Value = Self::check(resp).await?.json().await?;
        created["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| CalendarError::Decode("created event has no id".into()))
    }

    async fn update_event(
        &self,
        event_id: &str,
        window: &TimeWindow,
    ) -> Result<(), CalendarError> {
        let body = Self::window_body(window, &self.tz);
        let resp = self
            .authed(self.client.patch(self.event_url(event_id)))
            .json(&body)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
        let resp = self
            .authed(self.client.delete(self.event_url(event_id)))
            .send()
            .await?;
        // Gone already is fine — drift between the booking log and the
        // backend must not fail a cancel.
        if resp.status() == StatusCode::NOT_FOUND || resp.status() == StatusCode::GONE {
            debug!(event_id, "delete on missing event treated as success");
            return Ok(());
        }
        Self::check(resp).await?;
        Ok(())
    }

    async fn find_event(&self, key: &IdentityKey) -> Result<Option<String>, CalendarError> {
        let resp = self
            .authed(self.client.get(self.events_url()))
            .query(&[(
                "privateExtendedProperty",
                format!("{IDENTITY_PROPERTY}={}", key.property_value()),
            )])
            .send()
            .await?;
        let body: serde_json::Value = Self::check(resp).await?.json().await?;
        Ok(body["items"]
            .as_array()
            .and_then(|items| items.first())
            .and_then(|item| item["id"].as_str())
            .map(String::from))
    }
}
