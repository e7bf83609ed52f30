//! Persisted OAuth credential record.
//!
//! A [`CredentialRecord`] is the token set stored for one account identifier.
//! Both token store backends serialize it as the same snake_case JSON object.
//! Records written as Google's raw token response (`expiry_date` in epoch
//! milliseconds, `scope` as one space-separated string) are read as well.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Token type assumed when the provider does not report one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Seconds shaved off a provider-reported lifetime so that a token is
/// considered stale slightly before the provider starts rejecting it.
const EXPIRY_SKEW_SECS: i64 = 60;

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

/// The OAuth token set stored for one account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredRecord")]
pub struct CredentialRecord {
    /// The access token for API requests.
    pub access_token: String,

    /// The refresh token for obtaining new access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// When the access token expires. `None` means unknown / non-expiring.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// The OAuth scopes that were granted.
    #[serde(default)]
    pub scopes: BTreeSet<String>,

    /// Token type reported by the provider, usually `Bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// When the record was last written. Stamped by the token store.
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

/// Every shape a stored record may take on disk or in the database.
#[derive(Deserialize)]
struct StoredRecord {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    /// Raw Google token responses carry epoch milliseconds.
    #[serde(default)]
    expiry_date: Option<i64>,
    #[serde(default)]
    scopes: Option<BTreeSet<String>>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl From<StoredRecord> for CredentialRecord {
    fn from(raw: StoredRecord) -> Self {
        let expires_at = raw
            .expires_at
            .or_else(|| raw.expiry_date.and_then(DateTime::from_timestamp_millis));
        let scopes = match (raw.scopes, raw.scope) {
            (Some(scopes), _) => scopes,
            (None, Some(scope)) => parse_scope(&scope),
            (None, None) => BTreeSet::new(),
        };

        Self {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token,
            expires_at,
            scopes,
            token_type: raw
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_token_type),
            updated_at: raw.updated_at.unwrap_or_default(),
        }
    }
}

impl CredentialRecord {
    /// Creates a record holding only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            scopes: BTreeSet::new(),
            token_type: default_token_type(),
            updated_at: Utc::now(),
        }
    }

    /// Builder: set the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Builder: set an absolute expiry.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Builder: set the expiry from a provider `expires_in` lifetime.
    pub fn with_expires_in(mut self, expires_in_secs: i64, now: DateTime<Utc>) -> Self {
        self.expires_at = Some(expiry_from_lifetime(expires_in_secs, now));
        self
    }

    /// Builder: set the granted scopes.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set the token type.
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// Returns true if the access token is stale at `now`.
    ///
    /// A record without an expiry is never stale.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Returns true if the access token is stale right now.
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    /// Returns true if the record carries an access token at all.
    pub fn is_usable(&self) -> bool {
        !self.access_token.trim().is_empty()
    }

    /// Returns true if a refresh token is available.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    /// Returns true if the record has every required scope.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }

    /// Returns the time until the token expires, if known.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at.map(|expires_at| expires_at - Utc::now())
    }
}

/// Converts a provider `expires_in` value into an absolute expiry.
pub fn expiry_from_lifetime(expires_in_secs: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    let skew = EXPIRY_SKEW_SECS.min(expires_in_secs / 2).max(0);
    now + Duration::seconds(expires_in_secs) - Duration::seconds(skew)
}

/// Splits an OAuth `scope` string into a scope set.
pub fn parse_scope(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("token_type", &self.token_type)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_creation() {
        let now = Utc::now();
        let record = CredentialRecord::new("access-token")
            .with_refresh_token("refresh-token")
            .with_expires_in(3600, now)
            .with_scopes(["scope1"]);

        assert_eq!(record.access_token, "access-token");
        assert_eq!(record.refresh_token.as_deref(), Some("refresh-token"));
        assert_eq!(record.token_type, "Bearer");
        assert!(record.expires_at.unwrap() > now);
        assert!(!record.is_stale_at(now));
        assert!(record.can_refresh());
    }

    #[test]
    fn stale_when_expiry_not_in_future() {
        let now = Utc::now();
        let record = CredentialRecord::new("access").with_expires_at(now);
        assert!(record.is_stale_at(now));

        let record = CredentialRecord::new("access").with_expires_at(now - Duration::seconds(1));
        assert!(record.is_stale_at(now));

        let record = CredentialRecord::new("access").with_expires_at(now + Duration::seconds(1));
        assert!(!record.is_stale_at(now));
    }

    #[test]
    fn missing_expiry_is_never_stale() {
        let record = CredentialRecord::new("access");
        assert!(!record.is_stale_at(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn empty_access_token_is_not_usable() {
        assert!(!CredentialRecord::new("").is_usable());
        assert!(!CredentialRecord::new("   ").is_usable());
        assert!(CredentialRecord::new("token").is_usable());
    }

    #[test]
    fn short_lifetimes_keep_a_positive_window() {
        let now = Utc::now();
        assert!(expiry_from_lifetime(10, now) > now);
        assert_eq!(
            expiry_from_lifetime(3600, now),
            now + Duration::seconds(3600 - 60)
        );
    }

    #[test]
    fn scope_check() {
        let record = CredentialRecord::new("access").with_scopes(["scope1", "scope2"]);

        assert!(record.has_scopes(&["scope1".to_string()]));
        assert!(record.has_scopes(&["scope1".to_string(), "scope2".to_string()]));
        assert!(!record.has_scopes(&["scope3".to_string()]));
    }

    #[test]
    fn parse_scope_splits_on_whitespace() {
        let scopes = parse_scope("a  b\tc");
        assert_eq!(scopes.len(), 3);
        assert!(scopes.contains("b"));
    }

    #[test]
    fn debug_redacts_tokens() {
        let record = CredentialRecord::new("secret-access").with_refresh_token("secret-refresh");
        let debug = format!("{:?}", record);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn deserializes_minimal_legacy_record() {
        let record: CredentialRecord =
            serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(record.access_token, "abc");
        assert_eq!(record.token_type, "Bearer");
        assert!(record.refresh_token.is_none());
        assert!(record.expires_at.is_none());
    }

    #[test]
    fn deserializes_raw_google_token_object() {
        let record: CredentialRecord = serde_json::from_str(
            r#"{
                "access_token": "ya29",
                "refresh_token": "1//r",
                "scope": "https://www.googleapis.com/auth/calendar.events openid",
                "token_type": "Bearer",
                "expiry_date": 1700000000000
            }"#,
        )
        .unwrap();

        assert_eq!(
            record.expires_at,
            Some("2023-11-14T22:13:20Z".parse().unwrap())
        );
        assert!(record.scopes.contains("https://www.googleapis.com/auth/calendar.events"));
        assert!(record.scopes.contains("openid"));
        assert!(record.is_stale());
        assert!(record.can_refresh());
    }

    #[test]
    fn explicit_fields_win_over_raw_google_fields() {
        let record: CredentialRecord = serde_json::from_str(
            r#"{
                "access_token": "abc",
                "expires_at": "2025-01-06T14:00:00Z",
                "expiry_date": 1700000000000,
                "scopes": ["a"],
                "scope": "b c"
            }"#,
        )
        .unwrap();

        assert_eq!(record.expires_at, Some("2025-01-06T14:00:00Z".parse().unwrap()));
        assert_eq!(record.scopes, parse_scope("a"));
    }

    #[test]
    fn serialized_shape() {
        let record = CredentialRecord {
            access_token: "abc".to_string(),
            refresh_token: Some("def".to_string()),
            expires_at: Some("2025-01-06T14:00:00Z".parse().unwrap()),
            scopes: parse_scope("https://www.googleapis.com/auth/calendar.events"),
            token_type: "Bearer".to_string(),
            updated_at: "2025-01-06T13:00:00Z".parse().unwrap(),
        };

        insta::assert_json_snapshot!(record, @r###"
        {
          "access_token": "abc",
          "refresh_token": "def",
          "expires_at": "2025-01-06T14:00:00Z",
          "scopes": [
            "https://www.googleapis.com/auth/calendar.events"
          ],
          "token_type": "Bearer",
          "updated_at": "2025-01-06T13:00:00Z"
        }
        "###);
    }
}
