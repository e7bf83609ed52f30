//! Google Calendar API client.
//!
//! Implements [`CalendarGateway`] against the Calendar API v3 events
//! endpoints, handling request building, pagination and error mapping.

use calbridge_core::{
    BoxFuture, CalendarEvent, EventChanges, EventPatch, EventRef, EventTime, ListEventsQuery,
    NewEvent,
};
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::gateway::CalendarGateway;

use super::config::GoogleConfig;
use super::credentials::UsableCredential;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Google Calendar API client.
#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    api_base: String,
}

impl GoogleCalendarClient {
    /// Creates a client from the Google configuration.
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    async fn list(
        &self,
        credential: &UsableCredential,
        query: ListEventsQuery,
    ) -> ProviderResult<Vec<CalendarEvent>> {
        let max = query.effective_max_results() as usize;
        let url = self.events_url(&query.calendar_id);
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = max - events.len();
            let mut request = self
                .http_client
                .get(&url)
                .header(AUTHORIZATION, credential.authorization_header())
                .query(&[
                    ("timeMin", query.time_min.to_rfc3339()),
                    ("timeMax", query.time_max.to_rfc3339()),
                    ("singleEvents", "true".to_string()),
                    ("orderBy", "startTime".to_string()),
                    ("maxResults", remaining.to_string()),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: EventListResponse = parse(send(request).await?).await?;
            events.extend(page.items);

            match page.next_page_token {
                Some(token) if events.len() < max => page_token = Some(token),
                _ => break,
            }
        }

        // Pages arrive ordered by start in the calendar's own time zone.
        events.truncate(max);

        debug!(
            calendar_id = %query.calendar_id,
            count = events.len(),
            "listed events"
        );
        Ok(events)
    }

    async fn create(
        &self,
        credential: &UsableCredential,
        event: NewEvent,
    ) -> ProviderResult<CalendarEvent> {
        let body = EventBody {
            summary: Some(event.summary.as_str()),
            description: event.description.as_deref(),
            start: Some(EventTime::at(event.start)),
            end: Some(EventTime::at(event.end)),
            recurrence: event.recurrence.as_deref().filter(|rules| !rules.is_empty()),
        };

        let request = self
            .http_client
            .post(self.events_url(&event.calendar_id))
            .header(AUTHORIZATION, credential.authorization_header())
            .json(&body);

        let created: CalendarEvent = parse(send(request).await?).await?;
        debug!(calendar_id = %event.calendar_id, event_id = %created.id, "created event");
        Ok(created)
    }

    async fn update(
        &self,
        credential: &UsableCredential,
        patch: EventPatch,
    ) -> ProviderResult<CalendarEvent> {
        let request = self
            .http_client
            .patch(self.event_url(&patch.calendar_id, &patch.event_id))
            .header(AUTHORIZATION, credential.authorization_header())
            .json(&EventBody::from_changes(&patch.changes));

        let updated: CalendarEvent = parse(send(request).await?).await?;
        debug!(calendar_id = %patch.calendar_id, event_id = %patch.event_id, "updated event");
        Ok(updated)
    }

    async fn delete(&self, credential: &UsableCredential, event: EventRef) -> ProviderResult<()> {
        let request = self
            .http_client
            .delete(self.event_url(&event.calendar_id, &event.event_id))
            .header(AUTHORIZATION, credential.authorization_header());

        send(request).await?;
        debug!(calendar_id = %event.calendar_id, event_id = %event.event_id, "deleted event");
        Ok(())
    }
}

impl CalendarGateway for GoogleCalendarClient {
    fn name(&self) -> &str {
        "google"
    }

    fn list_events<'a>(
        &'a self,
        credential: &'a UsableCredential,
        query: ListEventsQuery,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarEvent>>> {
        Box::pin(self.list(credential, query))
    }

    fn create_event<'a>(
        &'a self,
        credential: &'a UsableCredential,
        event: NewEvent,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>> {
        Box::pin(self.create(credential, event))
    }

    fn update_event<'a>(
        &'a self,
        credential: &'a UsableCredential,
        patch: EventPatch,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>> {
        Box::pin(self.update(credential, patch))
    }

    fn delete_event<'a>(
        &'a self,
        credential: &'a UsableCredential,
        event: EventRef,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.delete(credential, event))
    }
}

/// Sends a request and turns unsuccessful statuses into errors.
async fn send(request: reqwest::RequestBuilder) -> ProviderResult<reqwest::Response> {
    let response = request.send().await.map_err(ProviderError::from)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(
        status.as_u16(),
        error_message(&body, status.canonical_reason().unwrap_or("error")),
    ))
}

async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> ProviderResult<T> {
    let body = response.text().await.map_err(ProviderError::from)?;
    serde_json::from_str(&body)
        .map_err(|e| ProviderError::invalid_response(format!("failed to parse response: {}", e)))
}

/// Extracts Google's `error.message`, falling back to the raw body.
fn error_message(body: &str, fallback: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorResponse>(body) {
        return parsed.error.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return fallback.to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

/// Request body for event insert and patch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<EventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<EventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recurrence: Option<&'a [String]>,
}

impl<'a> EventBody<'a> {
    fn from_changes(changes: &'a EventChanges) -> Self {
        Self {
            summary: changes.summary.as_deref(),
            description: changes.description.as_deref(),
            start: changes.start.map(EventTime::at),
            end: changes.end.map(EventTime::at),
            recurrence: changes.recurrence.as_deref(),
        }
    }
}

/// Response from the events.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<CalendarEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
