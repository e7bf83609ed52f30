//! OAuth front door.
//!
//! `GET /auth` sends the user to Google's consent page. `GET /auth/callback`
//! exchanges the returned code and stores the account's first credential.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use calbridge_providers::google::PkceFlow;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// How long a consent round trip may take.
pub const PENDING_TTL: Duration = Duration::from_secs(10 * 60);

/// Most consent flows kept waiting at once. `/auth` is unauthenticated.
pub const MAX_PENDING: usize = 1024;

struct Pending {
    verifier: String,
    created: Instant,
    seq: u64,
}

/// PKCE verifiers of consent flows that have not come back yet, keyed by
/// their `state` parameter.
///
/// Bounded: once full, the oldest flow is dropped to make room.
pub struct PendingAuthorizations {
    entries: Mutex<HashMap<String, Pending>>,
    ttl: Duration,
    capacity: usize,
    next_seq: AtomicU64,
}

impl Default for PendingAuthorizations {
    fn default() -> Self {
        Self::new(PENDING_TTL)
    }
}

impl PendingAuthorizations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: MAX_PENDING,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Builder: cap the number of waiting flows. At least one is kept.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Remembers the verifier for `state`, dropping expired entries and,
    /// when full, the oldest one.
    pub fn insert(&self, state: impl Into<String>, verifier: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let ttl = self.ttl;
        entries.retain(|_, pending| pending.created.elapsed() < ttl);

        let state = state.into();
        while !entries.contains_key(&state) && entries.len() >= self.capacity {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, pending)| pending.seq)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&oldest);
            warn!(capacity = self.capacity, "too many pending authorizations, dropped the oldest");
        }

        entries.insert(
            state,
            Pending {
                verifier: verifier.into(),
                created: Instant::now(),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
    }

    /// Removes and returns the verifier for `state` if it has not expired.
    ///
    /// Each state is accepted at most once.
    pub fn take(&self, state: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = entries.remove(state)?;
        (pending.created.elapsed() < self.ttl).then_some(pending.verifier)
    }

    /// Number of flows waiting for their callback.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// GET /auth: redirect to the consent page.
pub async fn start_authorization(State(state): State<SharedState>) -> Response {
    let flow = PkceFlow::new();
    let url = state.oauth.authorization_url(&flow);
    state.pending.insert(flow.state, flow.verifier);

    info!(account_id = %state.account_id, "starting authorization flow");
    Redirect::temporary(&url).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /auth/callback: exchange the code and store the credential.
///
/// Tokens are never echoed back.
pub async fn complete_authorization(
    State(state): State<SharedState>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Json<Value>> {
    if let Some(error) = query.error {
        warn!(error = %error, "consent was not granted");
        return Err(ApiError::oauth_flow(format!("consent was not granted: {}", error)));
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::oauth_flow("missing `code` parameter"))?;
    let flow_state = query
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::oauth_flow("missing `state` parameter"))?;

    let verifier = state
        .pending
        .take(&flow_state)
        .ok_or_else(|| ApiError::oauth_flow("unknown or expired `state`, start again at /auth"))?;

    let grant = state
        .oauth
        .exchange_code(&code, &verifier)
        .await
        .map_err(|e| ApiError::oauth_flow(e.message().to_string()))?;

    if grant.refresh_token.is_none() {
        warn!(
            account_id = %state.account_id,
            "authorization returned no refresh token, the credential cannot be renewed"
        );
    }

    let record = grant.into_record(None, Utc::now());
    let record = state.store.upsert(&state.account_id, record).await?;
    debug!(account_id = %state.account_id, backend = state.store.backend(), "credential stored");
    info!(account_id = %state.account_id, "account authorized");

    Ok(Json(json!({
        "ok": true,
        "account_id": state.account_id,
        "scopes": record.scopes,
        "expires_at": record.expires_at,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestApp, body_json};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::LOCATION};
    use tower::ServiceExt;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn pending_state_is_single_use() {
        let pending = PendingAuthorizations::default();
        pending.insert("s1", "v1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.take("s1").as_deref(), Some("v1"));
        assert_eq!(pending.take("s1"), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn pending_state_expires() {
        let pending = PendingAuthorizations::new(Duration::ZERO);
        pending.insert("s1", "v1");
        assert_eq!(pending.take("s1"), None);
    }

    #[test]
    fn insert_prunes_expired_entries() {
        let pending = PendingAuthorizations::new(Duration::ZERO);
        pending.insert("s1", "v1");
        pending.insert("s2", "v2");
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn full_map_drops_oldest_flow() {
        let pending = PendingAuthorizations::default().with_capacity(2);
        pending.insert("s1", "v1");
        pending.insert("s2", "v2");
        pending.insert("s3", "v3");

        assert_eq!(pending.len(), 2);
        assert_eq!(pending.take("s1"), None);
        assert_eq!(pending.take("s2").as_deref(), Some("v2"));
        assert_eq!(pending.take("s3").as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn repeated_auth_hits_stay_bounded() {
        let app = TestApp::new().await;
        let router = app.router();
        for _ in 0..(MAX_PENDING + 5) {
            let response = router
                .clone()
                .oneshot(Request::get("/auth").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        }
        assert_eq!(app.state.pending.len(), MAX_PENDING);
    }

    #[tokio::test]
    async fn auth_redirects_to_consent_page() {
        let app = TestApp::new().await;
        let response = app
            .router()
            .oneshot(Request::get("/auth").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers()[LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(location.contains("access_type=offline"));
        assert!(location.contains("prompt=consent"));
        assert!(location.contains("code_challenge_method=S256"));
        assert_eq!(app.state.pending.len(), 1);
    }

    #[tokio::test]
    async fn callback_stores_initial_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier=the-verifier"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.initial",
                "refresh_token": "1//refresh",
                "expires_in": 3599,
                "scope": "https://www.googleapis.com/auth/calendar.events",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let app = TestApp::with_token_url(format!("{}/token", server.uri())).await;
        app.state.pending.insert("the-state", "the-verifier");

        let response = app
            .router()
            .oneshot(
                Request::get("/auth/callback?code=4%2Fcode&state=the-state")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["account_id"], "default");
        assert_eq!(
            body["scopes"],
            json!(["https://www.googleapis.com/auth/calendar.events"])
        );
        assert!(body["expires_at"].is_string());
        assert!(!body.to_string().contains("ya29.initial"));

        let stored = app.state.store.get("default").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "ya29.initial");
        assert_eq!(stored.refresh_token.as_deref(), Some("1//refresh"));
    }

    #[tokio::test]
    async fn callback_rejects_unknown_state() {
        let app = TestApp::new().await;
        let response = app
            .router()
            .oneshot(
                Request::get("/auth/callback?code=c&state=forged")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "oauth_flow_failed");
        assert!(app.state.store.get("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn callback_reports_denied_consent() {
        let app = TestApp::new().await;
        let response = app
            .router()
            .oneshot(
                Request::get("/auth/callback?error=access_denied")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("access_denied"));
    }

    #[tokio::test]
    async fn failed_exchange_is_an_oauth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let app = TestApp::with_token_url(format!("{}/token", server.uri())).await;
        app.state.pending.insert("s", "v");

        let response = app
            .router()
            .oneshot(
                Request::get("/auth/callback?code=c&state=s")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "oauth_flow_failed");
    }
}
