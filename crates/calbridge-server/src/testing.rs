//! Router fixtures shared by the handler tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::to_bytes;
use axum::response::Response;
use calbridge_core::{BoxFuture, CalendarEvent, EventPatch, EventRef, ListEventsQuery, NewEvent};
use calbridge_providers::google::{GoogleConfig, OAuthCredentials, UsableCredential};
use calbridge_providers::{CalendarGateway, ProviderError, ProviderResult};
use calbridge_store::{FileTokenStore, TOKEN_FILE_NAME, TokenStore};
use tempfile::TempDir;

use crate::state::{AppState, SharedState};

/// Records what the handlers asked for and answers with canned events.
#[derive(Default)]
pub struct StubGateway {
    pub calls: AtomicUsize,
    pub last_list: Mutex<Option<ListEventsQuery>>,
    pub last_patch: Mutex<Option<EventPatch>>,
    pub last_token: Mutex<Option<String>>,
    failing: bool,
}

impl StubGateway {
    /// A gateway whose provider is unreachable.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    fn record(&self, credential: &UsableCredential) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_token.lock().unwrap() = Some(credential.access_token().to_string());
        if self.failing {
            return Err(ProviderError::network("connection refused"));
        }
        Ok(())
    }
}

impl CalendarGateway for StubGateway {
    fn name(&self) -> &str {
        "stub"
    }

    fn list_events<'a>(
        &'a self,
        credential: &'a UsableCredential,
        query: ListEventsQuery,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarEvent>>> {
        Box::pin(async move {
            self.record(credential)?;
            *self.last_list.lock().unwrap() = Some(query);
            Ok(vec![CalendarEvent {
                id: "evt-1".to_string(),
                summary: Some("Planning".to_string()),
                ..CalendarEvent::default()
            }])
        })
    }

    fn create_event<'a>(
        &'a self,
        credential: &'a UsableCredential,
        event: NewEvent,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>> {
        Box::pin(async move {
            self.record(credential)?;
            Ok(CalendarEvent {
                id: "created-1".to_string(),
                summary: Some(event.summary),
                recurrence: event.recurrence.unwrap_or_default(),
                ..CalendarEvent::default()
            })
        })
    }

    fn update_event<'a>(
        &'a self,
        credential: &'a UsableCredential,
        patch: EventPatch,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>> {
        Box::pin(async move {
            self.record(credential)?;
            let event = CalendarEvent {
                id: patch.event_id.clone(),
                description: patch.changes.description.clone(),
                ..CalendarEvent::default()
            };
            *self.last_patch.lock().unwrap() = Some(patch);
            Ok(event)
        })
    }

    fn delete_event<'a>(
        &'a self,
        credential: &'a UsableCredential,
        event: EventRef,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.record(credential)?;
            if event.event_id == "missing" {
                return Err(ProviderError::from_status(404, "Not Found"));
            }
            Ok(())
        })
    }
}

/// A router over an empty file store in a temporary directory.
pub struct TestApp {
    pub state: SharedState,
    pub gateway: Arc<StubGateway>,
    _dir: TempDir,
}

impl TestApp {
    pub const API_KEY: &'static str = "test-key";

    pub async fn new() -> Self {
        Self::build(Some(Self::API_KEY), None, Arc::new(StubGateway::default())).await
    }

    pub async fn without_api_key() -> Self {
        Self::build(None, None, Arc::new(StubGateway::default())).await
    }

    pub async fn with_token_url(token_url: String) -> Self {
        Self::build(Some(Self::API_KEY), Some(token_url), Arc::new(StubGateway::default())).await
    }

    pub async fn with_gateway(gateway: Arc<StubGateway>) -> Self {
        Self::build(Some(Self::API_KEY), None, gateway).await
    }

    async fn build(api_key: Option<&str>, token_url: Option<String>, gateway: Arc<StubGateway>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(dir.path().join(TOKEN_FILE_NAME)));
        store.ensure_schema().await.unwrap();

        let mut google = GoogleConfig::new(OAuthCredentials::new(
            "client-id",
            "client-secret",
            "http://localhost:3000/auth/callback",
        ));
        if let Some(token_url) = token_url {
            google = google.with_token_url(token_url);
        }

        let mut config = test_config(google);
        config.api_key = api_key.map(str::to_string);

        let state = AppState::new(&config, store)
            .unwrap()
            .with_gateway(gateway.clone());

        Self {
            state: Arc::new(state),
            gateway,
            _dir: dir,
        }
    }

    pub fn router(&self) -> Router {
        crate::router(Arc::clone(&self.state))
    }
}

fn test_config(google: GoogleConfig) -> crate::config::ServerConfig {
    let lookup = |key: &str| match key {
        "GOOGLE_CLIENT_ID" => Some(google.credentials.client_id.clone()),
        "GOOGLE_CLIENT_SECRET" => Some(google.credentials.client_secret.clone()),
        "OAUTH_REDIRECT_URI" => Some(google.credentials.redirect_uri.clone()),
        _ => None,
    };
    let mut config = crate::config::ServerConfig::from_lookup(lookup, None).unwrap();
    config.google = google;
    config
}

/// Reads a response body as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
