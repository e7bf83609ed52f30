//! Calendar REST routes and unauthenticated plumbing.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use calbridge_core::{
    CalendarEvent, CredentialRecord, DEFAULT_CALENDAR_ID, DEFAULT_MAX_RESULTS, EventChanges,
    EventPatch, EventRef, ListEventsQuery, NewEvent,
};
use calbridge_providers::google::UsableCredential;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Loads the account's credential and makes sure it is fresh.
///
/// A missing record, or one without an access token, means the account has
/// never been through the front door.
async fn usable_credential(state: &SharedState) -> ApiResult<UsableCredential> {
    let stored = state.store.get(&state.account_id).await?;
    let Some(record) = stored.filter(CredentialRecord::is_usable) else {
        return Err(ApiError::account_not_authorized(&state.account_id));
    };
    Ok(state
        .credentials
        .obtain_fresh_credential(&state.account_id, record)
        .await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    calendar_id: Option<String>,
    time_min: Option<String>,
    time_max: Option<String>,
    max_results: Option<String>,
}

impl ListParams {
    fn into_query(self) -> ApiResult<ListEventsQuery> {
        let time_min = parse_instant("timeMin", self.time_min)?;
        let time_max = parse_instant("timeMax", self.time_max)?;
        if time_max < time_min {
            return Err(ApiError::bad_request("`timeMax` must not be before `timeMin`"));
        }

        let max_results = match self.max_results.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => raw.parse::<u32>().map_err(|_| {
                ApiError::bad_request(format!("`maxResults` must be a positive integer, got `{}`", raw))
            })?,
            _ => DEFAULT_MAX_RESULTS,
        };

        Ok(ListEventsQuery::new(time_min, time_max)
            .with_calendar_id(calendar_or_default(self.calendar_id))
            .with_max_results(max_results))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarParam {
    calendar_id: Option<String>,
}

/// PATCH body: the changed fields, optionally naming the calendar.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBody {
    #[serde(default)]
    calendar_id: Option<String>,
    #[serde(flatten)]
    changes: EventChanges,
}

fn calendar_or_default(calendar_id: Option<String>) -> String {
    calendar_id
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CALENDAR_ID.to_string())
}

fn parse_instant(name: &str, value: Option<String>) -> ApiResult<DateTime<FixedOffset>> {
    let raw = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("`{}` is required", name)))?;
    DateTime::parse_from_rfc3339(raw.trim()).map_err(|e| {
        ApiError::bad_request(format!("`{}` must be an RFC 3339 instant: {}", name, e))
    })
}

/// GET /api/calendar/events
pub async fn list_events(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let query = params.into_query()?;
    let credential = usable_credential(&state).await?;

    debug!(
        calendar_id = %query.calendar_id,
        max_results = query.effective_max_results(),
        "listing events"
    );
    let items = state.gateway.list_events(&credential, query).await?;
    Ok(Json(json!({ "items": items })))
}

/// POST /api/calendar/events
pub async fn create_event(
    State(state): State<SharedState>,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> ApiResult<Json<CalendarEvent>> {
    let Json(mut event) = payload?;
    if event.summary.trim().is_empty() {
        return Err(ApiError::bad_request("`summary` must not be empty"));
    }
    if event.end < event.start {
        return Err(ApiError::bad_request("`end` must not be before `start`"));
    }
    event.calendar_id = calendar_or_default(Some(event.calendar_id));

    let credential = usable_credential(&state).await?;
    let calendar_id = event.calendar_id.clone();
    let created = state.gateway.create_event(&credential, event).await?;

    info!(calendar_id = %calendar_id, event_id = %created.id, "event created");
    Ok(Json(created))
}

/// PATCH /api/calendar/events/{eventId}
pub async fn update_event(
    State(state): State<SharedState>,
    Path(event_id): Path<String>,
    Query(params): Query<CalendarParam>,
    payload: Result<Json<UpdateBody>, JsonRejection>,
) -> ApiResult<Json<CalendarEvent>> {
    let Json(body) = payload?;
    if body.changes.is_empty() {
        return Err(ApiError::bad_request("no fields to update"));
    }

    // The query string wins over the body.
    let calendar_id = params
        .calendar_id
        .filter(|c| !c.trim().is_empty())
        .or(body.calendar_id);
    let patch = EventPatch::new(event_id)
        .with_calendar_id(calendar_or_default(calendar_id))
        .with_changes(body.changes);

    let credential = usable_credential(&state).await?;
    let calendar_id = patch.calendar_id.clone();
    let updated = state.gateway.update_event(&credential, patch).await?;

    info!(calendar_id = %calendar_id, event_id = %updated.id, "event updated");
    Ok(Json(updated))
}

/// DELETE /api/calendar/events/{eventId}
pub async fn delete_event(
    State(state): State<SharedState>,
    Path(event_id): Path<String>,
    Query(params): Query<CalendarParam>,
) -> ApiResult<Json<Value>> {
    let event = EventRef::new(calendar_or_default(params.calendar_id), event_id);

    let credential = usable_credential(&state).await?;
    let (calendar_id, event_id) = (event.calendar_id.clone(), event.event_id.clone());
    state.gateway.delete_event(&credential, event).await?;

    info!(calendar_id = %calendar_id, event_id = %event_id, "event deleted");
    Ok(Json(json!({ "ok": true })))
}

/// GET /healthz
pub async fn healthz(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "store": state.store.backend(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /openapi.json
pub async fn openapi() -> Json<Value> {
    Json(openapi_document())
}

/// OpenAPI 3.1 description of the calendar routes.
pub fn openapi_document() -> Value {
    let event_time = json!({ "type": "string", "format": "date-time" });
    let calendar_param = json!({
        "name": "calendarId",
        "in": "query",
        "required": false,
        "schema": { "type": "string", "default": DEFAULT_CALENDAR_ID }
    });
    let event_id_param = json!({
        "name": "eventId",
        "in": "path",
        "required": true,
        "schema": { "type": "string" }
    });
    let error_response = json!({
        "description": "Error",
        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Error" } } }
    });
    let event_response = json!({
        "description": "The event",
        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Event" } } }
    });

    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "calbridge",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Read and write events on the authorized Google Calendar."
        },
        "security": [{ "ApiKeyAuth": [] }],
        "paths": {
            "/api/calendar/events": {
                "get": {
                    "operationId": "listEvents",
                    "summary": "List events in a time window, ordered by start",
                    "parameters": [
                        calendar_param,
                        { "name": "timeMin", "in": "query", "required": true, "schema": event_time },
                        { "name": "timeMax", "in": "query", "required": true, "schema": event_time },
                        {
                            "name": "maxResults",
                            "in": "query",
                            "required": false,
                            "schema": { "type": "integer", "minimum": 1, "maximum": 2500, "default": DEFAULT_MAX_RESULTS }
                        }
                    ],
                    "responses": {
                        "200": {
                            "description": "Events",
                            "content": { "application/json": { "schema": {
                                "type": "object",
                                "properties": { "items": { "type": "array", "items": { "$ref": "#/components/schemas/Event" } } }
                            } } }
                        },
                        "default": error_response
                    }
                },
                "post": {
                    "operationId": "createEvent",
                    "summary": "Create an event",
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/NewEvent" } } }
                    },
                    "responses": { "200": event_response, "default": error_response }
                }
            },
            "/api/calendar/events/{eventId}": {
                "patch": {
                    "operationId": "updateEvent",
                    "summary": "Change some fields of an event",
                    "parameters": [event_id_param, calendar_param],
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/EventChanges" } } }
                    },
                    "responses": { "200": event_response, "default": error_response }
                },
                "delete": {
                    "operationId": "deleteEvent",
                    "summary": "Delete an event",
                    "parameters": [event_id_param, calendar_param],
                    "responses": {
                        "200": {
                            "description": "Deleted",
                            "content": { "application/json": { "schema": {
                                "type": "object",
                                "properties": { "ok": { "type": "boolean" } }
                            } } }
                        },
                        "default": error_response
                    }
                }
            }
        },
        "components": {
            "securitySchemes": {
                "ApiKeyAuth": { "type": "apiKey", "in": "header", "name": "x-api-key" }
            },
            "schemas": {
                "EventTime": {
                    "type": "object",
                    "properties": {
                        "dateTime": event_time,
                        "date": { "type": "string", "format": "date" },
                        "timeZone": { "type": "string" }
                    }
                },
                "Event": {
                    "type": "object",
                    "required": ["id"],
                    "properties": {
                        "id": { "type": "string" },
                        "status": { "type": "string" },
                        "summary": { "type": "string" },
                        "description": { "type": "string" },
                        "location": { "type": "string" },
                        "start": { "$ref": "#/components/schemas/EventTime" },
                        "end": { "$ref": "#/components/schemas/EventTime" },
                        "recurrence": { "type": "array", "items": { "type": "string" } },
                        "recurringEventId": { "type": "string" },
                        "htmlLink": { "type": "string" }
                    }
                },
                "NewEvent": {
                    "type": "object",
                    "required": ["summary", "start", "end"],
                    "properties": {
                        "calendarId": { "type": "string", "default": DEFAULT_CALENDAR_ID },
                        "summary": { "type": "string" },
                        "description": { "type": "string" },
                        "start": event_time,
                        "end": event_time,
                        "recurrence": { "type": "array", "items": { "type": "string" } }
                    }
                },
                "EventChanges": {
                    "type": "object",
                    "properties": {
                        "calendarId": {
                            "type": "string",
                            "description": "Used when the calendarId query parameter is absent"
                        },
                        "summary": { "type": "string" },
                        "description": { "type": "string" },
                        "start": event_time,
                        "end": event_time,
                        "recurrence": { "type": "array", "items": { "type": "string" } }
                    }
                },
                "Error": {
                    "type": "object",
                    "properties": {
                        "error": {
                            "type": "object",
                            "properties": {
                                "code": { "type": "string" },
                                "message": { "type": "string" }
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubGateway, TestApp, body_json};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    const WINDOW: &str = "timeMin=2026-03-01T00:00:00Z&timeMax=2026-03-08T00:00:00Z";

    fn get(uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(uri);
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn fresh_record() -> CredentialRecord {
        CredentialRecord::new("ya29.fresh")
            .with_refresh_token("1//refresh")
            .with_expires_at(Utc::now() + Duration::hours(1))
    }

    #[tokio::test]
    async fn empty_store_is_not_authorized() {
        let app = TestApp::new().await;
        let response = app
            .router()
            .oneshot(get(&format!("/api/calendar/events?{}", WINDOW), Some(TestApp::API_KEY)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "account_not_authorized");
        assert_eq!(app.gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_access_token_is_not_authorized() {
        let app = TestApp::new().await;
        app.state
            .store
            .upsert("default", CredentialRecord::new(""))
            .await
            .unwrap();

        let response = app
            .router()
            .oneshot(get(&format!("/api/calendar/events?{}", WINDOW), Some(TestApp::API_KEY)))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "account_not_authorized");
    }

    #[tokio::test]
    async fn missing_key_is_unauthorized() {
        let app = TestApp::new().await;
        let response = app
            .router()
            .oneshot(get(&format!("/api/calendar/events?{}", WINDOW), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn unset_key_rejects_everything() {
        let app = TestApp::without_api_key().await;
        let response = app
            .router()
            .oneshot(get(&format!("/api/calendar/events?{}", WINDOW), Some("anything")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lists_events_with_query_key() {
        let app = TestApp::new().await;
        app.state.store.upsert("default", fresh_record()).await.unwrap();

        let uri = format!(
            "/api/calendar/events?{}&calendarId=team&maxResults=5&key={}",
            WINDOW,
            TestApp::API_KEY
        );
        let response = app.router().oneshot(get(&uri, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["items"][0]["id"], "evt-1");

        let seen = app.gateway.last_list.lock().unwrap().clone().unwrap();
        assert_eq!(seen.calendar_id, "team");
        assert_eq!(seen.max_results, 5);
        assert_eq!(
            app.gateway.last_token.lock().unwrap().as_deref(),
            Some("ya29.fresh")
        );
    }

    #[tokio::test]
    async fn list_requires_time_window() {
        let app = TestApp::new().await;
        let response = app
            .router()
            .oneshot(get("/api/calendar/events?timeMin=2026-03-01T00:00:00Z", Some(TestApp::API_KEY)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "bad_request");
        assert!(body["error"]["message"].as_str().unwrap().contains("timeMax"));
    }

    #[tokio::test]
    async fn create_rejects_malformed_body() {
        let app = TestApp::new().await;
        let request = Request::post("/api/calendar/events")
            .header("x-api-key", TestApp::API_KEY)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"summary":"Standup"}"#))
            .unwrap();

        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn create_returns_provider_event() {
        let app = TestApp::new().await;
        app.state.store.upsert("default", fresh_record()).await.unwrap();

        let request = Request::post("/api/calendar/events")
            .header("authorization", format!("Bearer {}", TestApp::API_KEY))
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"summary":"Standup","start":"2026-03-02T09:00:00+01:00","end":"2026-03-02T09:15:00+01:00","recurrence":["RRULE:FREQ=DAILY"]}"#,
            ))
            .unwrap();

        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], "created-1");
        assert_eq!(body["summary"], "Standup");
    }

    #[tokio::test]
    async fn update_with_no_fields_is_rejected() {
        let app = TestApp::new().await;
        let request = Request::patch("/api/calendar/events/evt-1")
            .header("x-api-key", TestApp::API_KEY)
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_passes_event_and_calendar() {
        let app = TestApp::new().await;
        app.state.store.upsert("default", fresh_record()).await.unwrap();

        let request = Request::patch("/api/calendar/events/evt-9?calendarId=team")
            .header("x-api-key", TestApp::API_KEY)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"description":""}"#))
            .unwrap();

        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let patch = app.gateway.last_patch.lock().unwrap().clone().unwrap();
        assert_eq!(patch.event_id, "evt-9");
        assert_eq!(patch.calendar_id, "team");
        assert_eq!(patch.changes.description.as_deref(), Some(""));
        assert_eq!(patch.changes.summary, None);
    }

    #[tokio::test]
    async fn update_reads_calendar_from_body_unless_query_names_one() {
        let app = TestApp::new().await;
        app.state.store.upsert("default", fresh_record()).await.unwrap();

        let request = Request::patch("/api/calendar/events/evt-9")
            .header("x-api-key", TestApp::API_KEY)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"calendarId":"team","summary":"Retro"}"#))
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let patch = app.gateway.last_patch.lock().unwrap().clone().unwrap();
        assert_eq!(patch.calendar_id, "team");
        assert_eq!(patch.changes.summary.as_deref(), Some("Retro"));

        let request = Request::patch("/api/calendar/events/evt-9?calendarId=ops")
            .header("x-api-key", TestApp::API_KEY)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"calendarId":"team","summary":"Retro"}"#))
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let patch = app.gateway.last_patch.lock().unwrap().clone().unwrap();
        assert_eq!(patch.calendar_id, "ops");
    }

    #[tokio::test]
    async fn update_with_only_calendar_is_rejected() {
        let app = TestApp::new().await;
        app.state.store.upsert("default", fresh_record()).await.unwrap();

        let request = Request::patch("/api/calendar/events/evt-9")
            .header("x-api-key", TestApp::API_KEY)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"calendarId":"team"}"#))
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_returns_ok_and_maps_missing_event() {
        let app = TestApp::new().await;
        app.state.store.upsert("default", fresh_record()).await.unwrap();

        let request = Request::delete("/api/calendar/events/evt-1")
            .header("x-api-key", TestApp::API_KEY)
            .body(Body::empty())
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "ok": true }));

        let request = Request::delete("/api/calendar/events/missing")
            .header("x-api-key", TestApp::API_KEY)
            .body(Body::empty())
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "upstream_rejected");
    }

    #[tokio::test]
    async fn upstream_outage_is_bad_gateway() {
        let app = TestApp::with_gateway(Arc::new(StubGateway::failing())).await;
        app.state.store.upsert("default", fresh_record()).await.unwrap();

        let response = app
            .router()
            .oneshot(get(&format!("/api/calendar/events?{}", WINDOW), Some(TestApp::API_KEY)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "upstream_unavailable");
    }

    #[tokio::test]
    async fn healthz_needs_no_key() {
        let app = TestApp::new().await;
        let response = app.router().oneshot(get("/healthz", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"], "file");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn openapi_describes_operations() {
        let app = TestApp::new().await;
        let response = app.router().oneshot(get("/openapi.json", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let doc = body_json(response).await;
        assert_eq!(doc["openapi"], "3.1.0");
        assert_eq!(
            doc["paths"]["/api/calendar/events"]["get"]["operationId"],
            "listEvents"
        );
        assert_eq!(
            doc["paths"]["/api/calendar/events/{eventId}"]["delete"]["operationId"],
            "deleteEvent"
        );
        assert_eq!(
            doc["components"]["securitySchemes"]["ApiKeyAuth"]["type"],
            "apiKey"
        );
    }
}
