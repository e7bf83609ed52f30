//! API key gate for the calendar routes.
//!
//! Callers present the shared secret in one of four places, checked in this
//! order:
//!
//! 1. `Authorization: Bearer <key>`
//! 2. `Authorization: Basic <base64(user:key)>` (the part after the first colon)
//! 3. `x-api-key: <key>`
//! 4. `?key=<key>`

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::SharedState;

const API_KEY_HEADER: &str = "x-api-key";
const KEY_QUERY_PARAM: &str = "key";

/// Rejects requests that do not present the configured API key.
///
/// With no key configured every request is rejected.
pub async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key.as_deref() else {
        warn!("ACTIONS_API_KEY is not configured, rejecting API request");
        return Err(ApiError::Unauthorized);
    };

    let presented = extract_presented_key(request.headers(), request.uri().query());
    match presented {
        Some(key) if keys_match(&key, expected) => {
            debug!("API key accepted");
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(path = %request.uri().path(), "API key mismatch");
            Err(ApiError::Unauthorized)
        }
        None => {
            warn!(path = %request.uri().path(), "API key missing");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Compares keys without leaking the matching prefix length through timing.
pub fn keys_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Returns the key presented by the caller, if any.
pub fn extract_presented_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = strip_scheme(value, "Bearer") {
            return Some(token.to_string());
        }
        if let Some(key) = strip_scheme(value, "Basic").and_then(decode_basic) {
            return Some(key);
        }
    }

    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.trim().to_string());
    }

    query.and_then(query_key)
}

fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (found, rest) = value.trim().split_once(' ')?;
    found
        .eq_ignore_ascii_case(scheme)
        .then(|| rest.trim())
        .filter(|rest| !rest.is_empty())
}

fn decode_basic(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    let (_, key) = decoded.split_once(':')?;
    Some(key.to_string())
}

fn query_key(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name != KEY_QUERY_PARAM {
            return None;
        }
        urlencoding::decode(value).ok().map(|v| v.into_owned())
    })
}
