//! Google Calendar integration.
//!
//! - [`OAuthClient`]: consent URL, authorization code exchange, refresh grant
//! - [`CredentialManager`]: keeps stored credentials fresh, one refresh per account at a time
//! - [`GoogleCalendarClient`]: [`crate::CalendarGateway`] over the Calendar API v3
//!
//! # Example
//!
//! ```ignore
//! use calbridge_providers::google::{CredentialManager, GoogleCalendarClient, GoogleConfig, OAuthClient};
//!
//! let config = GoogleConfig::from_lookup(|k| std::env::var(k).ok())?;
//! let oauth = Arc::new(OAuthClient::new(&config)?);
//! let credentials = CredentialManager::new(store.clone(), oauth.clone());
//! let gateway = GoogleCalendarClient::new(&config)?;
//!
//! let credential = credentials.obtain_fresh_credential("default", stored).await;
//! let events = gateway.list_events(&credential, query).await?;
//! ```

mod client;
mod config;
mod credentials;
mod oauth;

pub use client::GoogleCalendarClient;
pub use config::{
    CALENDAR_API_BASE, DEFAULT_SCOPES, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GoogleConfig,
    OAuthCredentials,
};
pub use credentials::{CredentialManager, UsableCredential};
pub use oauth::{OAuthClient, PkceFlow, TokenExchange, TokenGrant};
