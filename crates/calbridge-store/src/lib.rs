//! Durable credential storage.
//!
//! This crate provides the [`TokenStore`] trait and its two backends:
//!
//! - [`PgTokenStore`]: a `user_tokens` table in PostgreSQL
//! - [`FileTokenStore`]: a JSON object in `tokens.local.json`
//!
//! The backend is selected once at startup with [`open`]. Callers only ever
//! see `Arc<dyn TokenStore>`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use calbridge_core::{BoxFuture, CredentialRecord};
use chrono::{DateTime, Utc};
use tracing::info;

pub mod config;
pub mod error;
pub mod file;
pub mod postgres;

pub use config::{DatabaseConfig, StoreConfig, TOKEN_FILE_NAME};
pub use error::{StoreError, StoreResult};
pub use file::FileTokenStore;
pub use postgres::PgTokenStore;

/// Default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Mapping from an account identifier to its [`CredentialRecord`].
///
/// Implementations must be safe to share across request handlers. Writes
/// replace the whole record and stamp `updated_at` so that it strictly
/// increases per account.
pub trait TokenStore: Send + Sync {
    /// Short backend name for logs and health checks.
    fn backend(&self) -> &'static str;

    /// Creates whatever the backend needs before the first read. Idempotent.
    fn ensure_schema(&self) -> BoxFuture<'_, StoreResult<()>>;

    /// Returns the record for `account_id`, or `None` if there is none.
    fn get<'a>(
        &'a self,
        account_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<CredentialRecord>>>;

    /// Replaces the record for `account_id` and returns it as persisted.
    ///
    /// The returned record carries the stamped `updated_at`. The write is
    /// durable once the future resolves.
    fn upsert<'a>(
        &'a self,
        account_id: &'a str,
        record: CredentialRecord,
    ) -> BoxFuture<'a, StoreResult<CredentialRecord>>;
}

/// Opens the configured backend.
///
/// PostgreSQL pools connect lazily, so this does not touch the network. Must
/// be called from within a tokio runtime.
pub fn open(config: &StoreConfig, timeout: Duration) -> StoreResult<Arc<dyn TokenStore>> {
    let store: Arc<dyn TokenStore> = match config {
        StoreConfig::Postgres(database) => Arc::new(PgTokenStore::connect_lazy(database, timeout)?),
        StoreConfig::File { path } => Arc::new(FileTokenStore::new(path).with_timeout(timeout)),
    };
    info!(backend = store.backend(), "token store selected");
    Ok(store)
}

/// Runs a store operation under a deadline.
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::timed_out(operation, timeout)),
    }
}

/// Computes the `updated_at` stamp for a write.
///
/// Returns `now` unless that would not advance past `previous`, in which
/// case the previous stamp plus one microsecond is used.
pub fn next_update_stamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(previous) => {
            let floor = previous + chrono::Duration::microseconds(1);
            if now < floor { floor } else { now }
        }
        None => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn stamp_uses_now_when_it_advances() {
        let previous = Utc::now();
        let now = previous + ChronoDuration::seconds(5);
        assert_eq!(next_update_stamp(Some(previous), now), now);
        assert_eq!(next_update_stamp(None, now), now);
    }

    #[test]
    fn stamp_advances_past_previous_when_clock_lags() {
        let previous = Utc::now();
        let stamp = next_update_stamp(Some(previous), previous);
        assert!(stamp > previous);
        assert_eq!(stamp - previous, ChronoDuration::microseconds(1));

        let earlier = previous - ChronoDuration::seconds(30);
        assert!(next_update_stamp(Some(previous), earlier) > previous);
    }

    #[tokio::test]
    async fn timeout_reports_unavailable() {
        let result: StoreResult<()> = with_timeout(
            "get",
            Duration::from_millis(10),
            std::future::pending::<StoreResult<()>>(),
        )
        .await;

        match result {
            Err(StoreError::Unavailable { message }) => {
                assert!(message.contains("get timed out"));
            }
            other => panic!("expected unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn completed_operation_passes_through() {
        let result = with_timeout("get", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn open_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&StoreConfig::file_in(dir.path()), DEFAULT_STORE_TIMEOUT).unwrap();
        assert_eq!(store.backend(), "file");
        assert!(store.get("default").await.unwrap().is_none());
    }
}
