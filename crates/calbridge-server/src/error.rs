//! Server error types.
//!
//! [`ServerError`] covers startup and maintenance commands. [`ApiError`] is
//! the HTTP boundary: every handler failure becomes exactly one JSON body of
//! the form `{"error":{"code":…,"message":…}}`.

use std::io;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use calbridge_providers::{ProviderError, ProviderErrorCode};
use calbridge_store::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Result type for startup operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that stop the process before or while serving.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (binding the listener, serving).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Token store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Provider client could not be built.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Logging could not be initialized.
    #[error("Tracing error: {0}")]
    Tracing(#[from] calbridge_core::TracingError),
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type for request handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No or wrong API key.
    #[error("missing or invalid API key")]
    Unauthorized,

    /// The account has no usable credential yet.
    #[error("account `{account_id}` is not authorized, visit /auth first")]
    AccountNotAuthorized { account_id: String },

    /// The provider rejected the credential.
    #[error("calendar access was revoked or expired, visit /auth again: {message}")]
    ReauthorizationRequired { message: String },

    /// The request itself is malformed.
    #[error("{message}")]
    BadRequest { message: String },

    /// The token store could not be reached in time.
    #[error("token store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The token store holds data that cannot be read.
    #[error("token store is corrupt: {message}")]
    StoreCorrupt { message: String },

    /// The provider could not be reached or answered garbage.
    #[error("calendar provider unavailable: {message}")]
    UpstreamUnavailable { message: String },

    /// The provider is throttling us. Retryable, so reported as unavailable.
    #[error("calendar provider is rate limiting requests: {message}")]
    UpstreamRateLimited { message: String },

    /// The provider refused the request.
    #[error("calendar provider rejected the request: {message}")]
    UpstreamRejected { status: StatusCode, message: String },

    /// The consent flow callback could not be completed.
    #[error("authorization flow failed: {message}")]
    OAuthFlow { message: String },

    /// Anything else.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn account_not_authorized(account_id: impl Into<String>) -> Self {
        Self::AccountNotAuthorized {
            account_id: account_id.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn oauth_flow(message: impl Into<String>) -> Self {
        Self::OAuthFlow {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::AccountNotAuthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::ReauthorizationRequired { .. } => StatusCode::UNAUTHORIZED,
            Self::BadRequest { .. } | Self::OAuthFlow { .. } => StatusCode::BAD_REQUEST,
            Self::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::StoreCorrupt { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamRejected { status, .. } => *status,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::AccountNotAuthorized { .. } => "account_not_authorized",
            Self::ReauthorizationRequired { .. } => "reauthorization_required",
            Self::BadRequest { .. } => "bad_request",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::StoreCorrupt { .. } => "store_corrupt",
            Self::UpstreamUnavailable { .. } | Self::UpstreamRateLimited { .. } => {
                "upstream_unavailable"
            }
            Self::UpstreamRejected { .. } => "upstream_rejected",
            Self::OAuthFlow { .. } => "oauth_flow_failed",
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { message } => Self::StoreUnavailable { message },
            StoreError::Corrupt { message } => Self::StoreCorrupt { message },
            StoreError::Config { message } => Self::Internal { message },
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        let message = err.message().to_string();
        match err.code() {
            code if code.is_unavailable() => Self::UpstreamUnavailable { message },
            ProviderErrorCode::AuthenticationFailed => Self::ReauthorizationRequired { message },
            ProviderErrorCode::RateLimited => Self::UpstreamRateLimited { message },
            ProviderErrorCode::ConfigurationError | ProviderErrorCode::InternalError => {
                Self::Internal { message }
            }
            code => {
                let status = err
                    .status()
                    .and_then(|s| StatusCode::from_u16(s).ok())
                    .filter(StatusCode::is_client_error)
                    .unwrap_or_else(|| default_rejection_status(code));
                Self::UpstreamRejected { status, message }
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

fn default_rejection_status(code: ProviderErrorCode) -> StatusCode {
    match code {
        ProviderErrorCode::AuthorizationFailed => StatusCode::FORBIDDEN,
        ProviderErrorCode::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        } else {
            warn!(code = self.code(), error = %self, "request rejected");
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn account_not_authorized_body() {
        let (status, body) = body_json(ApiError::account_not_authorized("default")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        insta::assert_json_snapshot!(body, @r#"
        {
          "error": {
            "code": "account_not_authorized",
            "message": "account `default` is not authorized, visit /auth first"
          }
        }
        "#);
    }

    #[test]
    fn store_errors_map_to_statuses() {
        let err = ApiError::from(StoreError::unavailable("connection refused"));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "store_unavailable");

        let err = ApiError::from(StoreError::corrupt("bad json"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "store_corrupt");

        let err = ApiError::from(StoreError::config("bad port"));
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn provider_unavailable_maps_to_bad_gateway() {
        for err in [
            ProviderError::network("timed out"),
            ProviderError::server("boom").with_status(503),
            ProviderError::invalid_response("not json"),
        ] {
            let api = ApiError::from(err);
            assert_eq!(api.status(), StatusCode::BAD_GATEWAY);
            assert_eq!(api.code(), "upstream_unavailable");
        }
    }

    #[test]
    fn provider_401_requires_reauthorization() {
        let api = ApiError::from(ProviderError::from_status(401, "invalid credentials"));
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(api.code(), "reauthorization_required");
    }

    #[test]
    fn provider_rejections_keep_status() {
        let api = ApiError::from(ProviderError::from_status(404, "Not Found"));
        assert_eq!(api.status(), StatusCode::NOT_FOUND);
        assert_eq!(api.code(), "upstream_rejected");

        let api = ApiError::from(ProviderError::from_status(403, "insufficient scope"));
        assert_eq!(api.status(), StatusCode::FORBIDDEN);

        let api = ApiError::from(ProviderError::not_found("gone"));
        assert_eq!(api.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn provider_429_is_retryable() {
        let (status, body) =
            body_json(ApiError::from(ProviderError::from_status(429, "Rate Limit Exceeded"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "upstream_unavailable");

        let api = ApiError::from(ProviderError::new(ProviderErrorCode::RateLimited, "quota"));
        assert_eq!(api.code(), "upstream_unavailable");
    }

    #[test]
    fn provider_configuration_is_internal() {
        let api = ApiError::from(ProviderError::configuration("no client id"));
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.code(), "internal_error");
    }
}
