//! Google OAuth and Calendar API configuration.

use std::time::Duration;

use url::Url;

use crate::error::{ProviderError, ProviderResult};

/// Google OAuth endpoints.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Base URL for Google Calendar API v3.
pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Scopes requested when `GOOGLE_SCOPES` is not set.
pub const DEFAULT_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/calendar.events",
    "https://www.googleapis.com/auth/calendar.readonly",
];

/// OAuth 2.0 client identity registered with Google.
#[derive(Clone)]
pub struct OAuthCredentials {
    /// The OAuth 2.0 client ID from Google Cloud Console.
    pub client_id: String,
    /// The OAuth 2.0 client secret from Google Cloud Console.
    pub client_secret: String,
    /// Where Google sends the user back after consent.
    pub redirect_uri: String,
}

impl OAuthCredentials {
    /// Creates new OAuth credentials.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Validates that the credentials are usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_id.trim().is_empty() {
            return Err("client_id is required".to_string());
        }
        if self.client_secret.trim().is_empty() {
            return Err("client_secret is required".to_string());
        }
        let redirect = Url::parse(&self.redirect_uri)
            .map_err(|e| format!("redirect_uri `{}` is not a URL: {}", self.redirect_uri, e))?;
        if !matches!(redirect.scheme(), "http" | "https") {
            return Err(format!(
                "redirect_uri must be http or https, got `{}`",
                redirect.scheme()
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Configuration shared by the OAuth client and the Calendar client.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// OAuth client identity.
    pub credentials: OAuthCredentials,

    /// OAuth scopes to request.
    pub scopes: Vec<String>,

    /// Timeout applied to every HTTP request to Google.
    pub timeout: Duration,

    /// Calendar API base URL.
    pub api_base: String,

    /// Consent page URL.
    pub auth_url: String,

    /// Token endpoint URL.
    pub token_url: String,

    /// User agent string for API requests.
    pub user_agent: String,
}

impl GoogleConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Creates a configuration against Google's production endpoints.
    pub fn new(credentials: OAuthCredentials) -> Self {
        Self {
            credentials,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            api_base: CALENDAR_API_BASE.to_string(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            user_agent: format!("calbridge/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Builds the configuration from variables supplied by `lookup`.
    ///
    /// Reads `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `OAUTH_REDIRECT_URI`
    /// (falling back to `GOOGLE_REDIRECT_URI`) and `GOOGLE_SCOPES`. All missing
    /// required variables are reported together.
    pub fn from_lookup<F>(lookup: F) -> ProviderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let client_id = get("GOOGLE_CLIENT_ID");
        let client_secret = get("GOOGLE_CLIENT_SECRET");
        let redirect_uri = get("OAUTH_REDIRECT_URI").or_else(|| get("GOOGLE_REDIRECT_URI"));

        let (Some(client_id), Some(client_secret), Some(redirect_uri)) =
            (client_id.clone(), client_secret.clone(), redirect_uri.clone())
        else {
            let mut missing = Vec::new();
            if client_id.is_none() {
                missing.push("GOOGLE_CLIENT_ID");
            }
            if client_secret.is_none() {
                missing.push("GOOGLE_CLIENT_SECRET");
            }
            if redirect_uri.is_none() {
                missing.push("OAUTH_REDIRECT_URI");
            }
            return Err(ProviderError::configuration(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        };

        let mut config = Self::new(OAuthCredentials::new(client_id, client_secret, redirect_uri));
        if let Some(scopes) = get("GOOGLE_SCOPES") {
            config.scopes = scopes.split_whitespace().map(str::to_string).collect();
        }
        config.validate().map_err(ProviderError::configuration)?;
        Ok(config)
    }

    /// Sets the OAuth scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Points the Calendar client at another base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Points the OAuth client at another token endpoint.
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Points the OAuth client at another consent page.
    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.credentials.validate()?;
        if self.scopes.is_empty() {
            return Err("at least one scope is required".to_string());
        }
        if self.timeout.is_zero() {
            return Err("timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}
