//! Credential freshness and refresh.
//!
//! [`CredentialManager`] turns a stored [`CredentialRecord`] into a
//! [`UsableCredential`], refreshing it through [`TokenExchange`] when it is
//! stale. Concurrent refreshes of the same account are coalesced into one
//! exchange and one store write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use calbridge_core::{BoxFuture, CredentialRecord};
use calbridge_store::TokenStore;
use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::Shared;
use tracing::{debug, error, info, warn};

use super::oauth::TokenExchange;

/// A credential ready to authorize a provider call.
#[derive(Debug, Clone)]
pub struct UsableCredential {
    pub account_id: String,
    pub record: CredentialRecord,
    /// True if the record was replaced by a newer one during this call.
    pub refreshed: bool,
}

impl UsableCredential {
    pub fn new(account_id: impl Into<String>, record: CredentialRecord, refreshed: bool) -> Self {
        Self {
            account_id: account_id.into(),
            record,
            refreshed,
        }
    }

    /// Returns the access token.
    pub fn access_token(&self) -> &str {
        &self.record.access_token
    }

    /// Returns the `Authorization` header value, e.g. `Bearer ya29...`.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.record.token_type, self.record.access_token)
    }
}

#[derive(Debug, Clone)]
struct RefreshOutcome {
    record: CredentialRecord,
    refreshed: bool,
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;
type InFlight = Arc<Mutex<HashMap<String, SharedRefresh>>>;

/// Keeps credentials fresh.
///
/// Cheap to clone; clones share the in-flight refresh table.
#[derive(Clone)]
pub struct CredentialManager {
    store: Arc<dyn TokenStore>,
    exchange: Arc<dyn TokenExchange>,
    in_flight: InFlight,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn TokenStore>, exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            store,
            exchange,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the token store credentials are written back to.
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Returns a credential for `account_id`, refreshing `stored` if stale.
    ///
    /// Never fails. A fresh record is returned untouched. A stale record is
    /// refreshed and persisted once, shared with every concurrent caller for
    /// the same account. If the refresh grant fails, or there is no refresh
    /// token, the stale record is returned and the provider call decides.
    pub async fn obtain_fresh_credential(
        &self,
        account_id: &str,
        stored: CredentialRecord,
    ) -> UsableCredential {
        if !stored.is_stale_at(Utc::now()) {
            return UsableCredential::new(account_id, stored, false);
        }

        if !stored.can_refresh() {
            debug!(account_id, "credential is stale and has no refresh token");
            return UsableCredential::new(account_id, stored, false);
        }

        let outcome = self.join_or_start(account_id, stored).await;
        UsableCredential::new(account_id, outcome.record, outcome.refreshed)
    }

    /// Number of accounts with a refresh in progress.
    pub fn refreshes_in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn join_or_start(&self, account_id: &str, stored: CredentialRecord) -> SharedRefresh {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = in_flight.get(account_id) {
            debug!(account_id, "joining in-flight refresh");
            return existing.clone();
        }

        let refresh = refresh_account(
            Arc::clone(&self.store),
            Arc::clone(&self.exchange),
            Arc::clone(&self.in_flight),
            account_id.to_string(),
            stored,
        )
        .boxed()
        .shared();
        in_flight.insert(account_id.to_string(), refresh.clone());
        refresh
    }
}

async fn refresh_account(
    store: Arc<dyn TokenStore>,
    exchange: Arc<dyn TokenExchange>,
    in_flight: InFlight,
    account_id: String,
    stored: CredentialRecord,
) -> RefreshOutcome {
    let outcome = run_refresh(store.as_ref(), exchange.as_ref(), &account_id, stored).await;
    in_flight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&account_id);
    outcome
}

async fn run_refresh(
    store: &dyn TokenStore,
    exchange: &dyn TokenExchange,
    account_id: &str,
    stored: CredentialRecord,
) -> RefreshOutcome {
    // Another caller or instance may have refreshed since `stored` was read.
    match store.get(account_id).await {
        Ok(Some(current)) if current.is_usable() && !current.is_stale_at(Utc::now()) => {
            debug!(account_id, "credential already refreshed in store");
            let refreshed = current != stored;
            return RefreshOutcome {
                record: current,
                refreshed,
            };
        }
        Ok(_) => {}
        Err(e) => warn!(account_id, error = %e, "could not re-read credential before refresh"),
    }

    let Some(refresh_token) = stored.refresh_token.clone() else {
        return RefreshOutcome {
            record: stored,
            refreshed: false,
        };
    };

    let grant = match exchange.refresh(&refresh_token).await {
        Ok(grant) => grant,
        Err(e) => {
            warn!(account_id, error = %e, "token refresh failed, continuing with stored credential");
            return RefreshOutcome {
                record: stored,
                refreshed: false,
            };
        }
    };

    let record = grant.into_record(Some(&stored), Utc::now());
    match store.upsert(account_id, record.clone()).await {
        Ok(saved) => {
            info!(account_id, backend = store.backend(), "refreshed access token");
            RefreshOutcome {
                record: saved,
                refreshed: true,
            }
        }
        Err(e) => {
            error!(account_id, error = %e, "refreshed access token could not be saved");
            RefreshOutcome {
                record,
                refreshed: true,
            }
        }
    }
}
