//! Error types for provider operations.
//!
//! Every failure talking to Google (token endpoint or Calendar API) is a
//! [`ProviderError`] tagged with a [`ProviderErrorCode`]. The HTTP layer maps
//! codes onto its own response taxonomy.

use std::fmt;
use thiserror::Error;

/// The category of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// Credentials were rejected (HTTP 401, or a failed token grant).
    AuthenticationFailed,
    /// The account lacks permission (HTTP 403).
    AuthorizationFailed,
    /// Connection failure, DNS, or timeout.
    NetworkError,
    /// Too many requests (HTTP 429).
    RateLimited,
    /// Server returned a 5xx status.
    ServerError,
    /// The response body could not be parsed.
    InvalidResponse,
    /// Resource not found or gone (HTTP 404/410).
    NotFound,
    /// Any other 4xx.
    BadRequest,
    /// Missing or invalid configuration.
    ConfigurationError,
    /// Unexpected internal state.
    InternalError,
}

impl ProviderErrorCode {
    /// Returns true if this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::RateLimited | Self::ServerError
        )
    }

    /// Returns true if the provider could not be reached or answered garbage.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::ServerError | Self::InvalidResponse
        )
    }

    /// Returns a stable snake_case name for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationFailed => "authorization_failed",
            Self::NetworkError => "network_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::ConfigurationError => "configuration_error",
            Self::InternalError => "internal_error",
        }
    }

    /// Classifies an unsuccessful HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::AuthenticationFailed,
            403 => Self::AuthorizationFailed,
            404 | 410 => Self::NotFound,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            400..=499 => Self::BadRequest,
            _ => Self::InvalidResponse,
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error that occurred while talking to the provider.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    /// HTTP status returned by the provider, when there was one.
    status: Option<u16>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// Creates a new provider error with the given code and message.
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Creates an error from an unsuccessful HTTP response.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::from_status(status), message).with_status(status)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthenticationFailed, message)
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NetworkError, message)
    }

    /// Creates a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ServerError, message)
    }

    /// Creates an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NotFound, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ConfigurationError, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InternalError, message)
    }

    /// Sets the HTTP status the provider answered with.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the source error for this error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the provider's HTTP status, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timeout".to_string()
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else if err.is_decode() {
            return Self::invalid_response(format!("failed to read response: {}", err))
                .with_source(err);
        } else {
            format!("request failed: {}", err)
        };
        Self::network(message).with_source(err)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.code, status, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// A specialized Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
