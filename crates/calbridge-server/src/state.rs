//! Shared application state.

use std::sync::Arc;

use calbridge_providers::CalendarGateway;
use calbridge_providers::google::{
    CredentialManager, GoogleCalendarClient, OAuthClient, TokenExchange,
};
use calbridge_store::TokenStore;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::oauth::PendingAuthorizations;

/// State shared by every handler.
pub type SharedState = Arc<AppState>;

/// Everything a request needs, built once at startup.
pub struct AppState {
    /// The single account this deployment serves.
    pub account_id: String,
    /// Shared secret for the API routes.
    pub api_key: Option<String>,
    pub store: Arc<dyn TokenStore>,
    pub credentials: CredentialManager,
    pub gateway: Arc<dyn CalendarGateway>,
    /// Drives the consent flow on the front door.
    pub oauth: Arc<OAuthClient>,
    pub pending: PendingAuthorizations,
}

impl AppState {
    /// Wires the Google clients and the credential manager around `store`.
    pub fn new(config: &ServerConfig, store: Arc<dyn TokenStore>) -> ServerResult<Self> {
        let oauth = Arc::new(OAuthClient::new(&config.google)?);
        let gateway = Arc::new(GoogleCalendarClient::new(&config.google)?);
        let exchange: Arc<dyn TokenExchange> = oauth.clone();
        let credentials = CredentialManager::new(Arc::clone(&store), exchange);

        Ok(Self {
            account_id: config.account_id.clone(),
            api_key: config.api_key.clone(),
            store,
            credentials,
            gateway,
            oauth,
            pending: PendingAuthorizations::default(),
        })
    }

    /// Replaces the calendar gateway.
    pub fn with_gateway(mut self, gateway: Arc<dyn CalendarGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Replaces the credential manager.
    pub fn with_credentials(mut self, credentials: CredentialManager) -> Self {
        self.credentials = credentials;
        self
    }
}
