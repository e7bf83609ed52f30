//! OAuth 2.0 authorization code flow with PKCE for Google APIs.
//!
//! The server-side flow is split across two requests:
//!
//! 1. Generate a [`PkceFlow`] and redirect the user to
//!    [`OAuthClient::authorization_url`]
//! 2. On callback, exchange the code together with the verifier
//!    ([`OAuthClient::exchange_code`])
//!
//! Later refresh-token grants go through [`TokenExchange`], which
//! [`OAuthClient`] implements.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use calbridge_core::{BoxFuture, CredentialRecord, DEFAULT_TOKEN_TYPE, expiry_from_lifetime, parse_scope};
use chrono::{DateTime, Utc};
use rand::Rng as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};

use super::config::{GoogleConfig, OAuthCredentials};

/// The PKCE code verifier length (in bytes, before base64 encoding).
const CODE_VERIFIER_LENGTH: usize = 32;

/// The state length (in bytes, before base64 encoding).
const STATE_LENGTH: usize = 16;

/// The refresh-token grant.
///
/// Implemented by [`OAuthClient`]. Kept as a trait so credential refresh can
/// be driven without a live token endpoint.
pub trait TokenExchange: Send + Sync {
    /// Exchanges a refresh token for a new access token.
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, ProviderResult<TokenGrant>>;
}

/// OAuth client for Google APIs.
#[derive(Debug)]
pub struct OAuthClient {
    credentials: OAuthCredentials,
    scopes: Vec<String>,
    auth_url: String,
    token_url: String,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a new OAuth client from the Google configuration.
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            credentials: config.credentials.clone(),
            scopes: config.scopes.clone(),
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            http_client,
        })
    }

    /// Returns the scopes this client requests.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Builds the consent page URL for a PKCE flow.
    ///
    /// Requests offline access and forces the consent prompt so that Google
    /// issues a refresh token on every authorization.
    pub fn authorization_url(&self, pkce: &PkceFlow) -> String {
        let scope = self.scopes.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&\
            code_challenge={}&code_challenge_method=S256&state={}&\
            access_type=offline&prompt=consent",
            self.auth_url,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&self.credentials.redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(&pkce.challenge),
            urlencoding::encode(&pkce.state),
        )
    }

    /// Exchanges an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> ProviderResult<TokenGrant> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.credentials.redirect_uri.as_str()),
        ];

        let mut grant = self.token_request(&params, "token exchange").await?;
        if grant.scope.is_none() {
            grant.scope = Some(self.scopes.join(" "));
        }

        info!("obtained tokens from authorization code");
        Ok(grant)
    }

    /// Refreshes an access token using a refresh token.
    pub async fn refresh_token(&self, refresh_token: &str) -> ProviderResult<TokenGrant> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let grant = self.token_request(&params, "token refresh").await?;
        debug!("refreshed access token");
        Ok(grant)
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        operation: &str,
    ) -> ProviderResult<TokenGrant> {
        let response = self
            .http_client
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(ProviderError::from)?;

        let status = response.status();
        let body = response.text().await.map_err(ProviderError::from)?;

        if status.is_server_error() {
            return Err(ProviderError::server(format!(
                "{} failed ({}): {}",
                operation, status, body
            ))
            .with_status(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ProviderError::authentication(format!(
                "{} failed ({}): {}",
                operation, status, body
            ))
            .with_status(status.as_u16()));
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::invalid_response(format!("invalid token response: {}", e)))
    }
}

impl TokenExchange for OAuthClient {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(self.refresh_token(refresh_token))
    }
}

/// Response from Google's token endpoint.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenGrant {
    /// Creates a grant carrying only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
            scope: None,
            token_type: None,
        }
    }

    /// Builder: set the lifetime in seconds.
    pub fn with_expires_in(mut self, expires_in: i64) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Builder: set the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Builds the record to persist from this grant.
    ///
    /// Google omits the refresh token (and sometimes the scope) on refresh
    /// grants; those are carried over from `previous`.
    pub fn into_record(
        self,
        previous: Option<&CredentialRecord>,
        now: DateTime<Utc>,
    ) -> CredentialRecord {
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous.and_then(|p| p.refresh_token.clone()));

        let scopes = match self.scope.as_deref() {
            Some(scope) if !scope.trim().is_empty() => parse_scope(scope),
            _ => previous.map(|p| p.scopes.clone()).unwrap_or_default(),
        };

        CredentialRecord {
            access_token: self.access_token,
            refresh_token,
            expires_at: self.expires_in.map(|secs| expiry_from_lifetime(secs, now)),
            scopes,
            token_type: self
                .token_type
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            updated_at: now,
        }
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// PKCE flow state and utilities.
///
/// Implements RFC 7636 (Proof Key for Code Exchange).
#[derive(Debug, Clone)]
pub struct PkceFlow {
    /// The code verifier (high-entropy random string).
    pub verifier: String,
    /// The code challenge (SHA-256 hash of verifier, base64url encoded).
    pub challenge: String,
    /// Random state for CSRF protection.
    pub state: String,
}

impl PkceFlow {
    /// Creates a new PKCE flow with random verifier and state.
    pub fn new() -> Self {
        let verifier = random_token(CODE_VERIFIER_LENGTH);
        let challenge = Self::compute_challenge(&verifier);
        let state = random_token(STATE_LENGTH);

        Self {
            verifier,
            challenge,
            state,
        }
    }

    /// Computes the SHA-256 challenge for a code verifier.
    pub fn compute_challenge(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}
