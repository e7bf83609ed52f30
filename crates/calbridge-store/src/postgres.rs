//! PostgreSQL token store.
//!
//! Records live in one table keyed by account identifier:
//!
//! ```sql
//! user_tokens(user_id text primary key, tokens jsonb not null,
//!             updated_at timestamptz not null default now())
//! ```
//!
//! The `updated_at` column is authoritative for the record's write stamp.

use std::time::Duration;

use calbridge_core::{BoxFuture, CredentialRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::{TokenStore, with_timeout};

/// Advisory lock key serializing schema creation across instances.
const SCHEMA_LOCK_KEY: i64 = 0x6361_6c62_7264_6731;

const MAX_CONNECTIONS: u32 = 5;

const CREATE_TABLE_SQL: &str = "\
CREATE TABLE IF NOT EXISTS user_tokens (
    user_id    text PRIMARY KEY,
    tokens     jsonb NOT NULL,
    updated_at timestamptz NOT NULL DEFAULT now()
)";

const SELECT_SQL: &str = "SELECT tokens, updated_at FROM user_tokens WHERE user_id = $1";

const UPSERT_SQL: &str = "\
INSERT INTO user_tokens (user_id, tokens, updated_at)
VALUES ($1, $2, now())
ON CONFLICT (user_id) DO UPDATE
SET tokens = EXCLUDED.tokens,
    updated_at = GREATEST(now(), user_tokens.updated_at + interval '1 microsecond')
RETURNING updated_at";

/// Token store backed by the `user_tokens` table.
#[derive(Debug, Clone)]
pub struct PgTokenStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgTokenStore {
    /// Creates a store whose pool connects on first use.
    ///
    /// Connection acquisition is bounded by `timeout`.
    pub fn connect_lazy(config: &DatabaseConfig, timeout: Duration) -> StoreResult<Self> {
        let options = config.connect_options()?;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(timeout)
            .connect_lazy_with(options);
        debug!(?config, "created lazy postgres pool");
        Ok(Self { pool, timeout })
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn create_table(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        sqlx::query(CREATE_TABLE_SQL).execute(&mut *tx).await?;
        tx.commit().await?;
        info!("user_tokens table ready");
        Ok(())
    }

    async fn fetch(&self, account_id: &str) -> StoreResult<Option<CredentialRecord>> {
        let row: Option<(Json<Value>, DateTime<Utc>)> = sqlx::query_as(SELECT_SQL)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some((Json(tokens), updated_at)) = row else {
            return Ok(None);
        };

        let mut record = decode_record(account_id, tokens)?;
        record.updated_at = updated_at;
        Ok(Some(record))
    }

    async fn store(
        &self,
        account_id: &str,
        mut record: CredentialRecord,
    ) -> StoreResult<CredentialRecord> {
        let updated_at: DateTime<Utc> = sqlx::query_scalar(UPSERT_SQL)
            .bind(account_id)
            .bind(Json(&record))
            .fetch_one(&self.pool)
            .await?;
        record.updated_at = updated_at;
        debug!(account_id, "saved credential record");
        Ok(record)
    }
}

fn decode_record(account_id: &str, tokens: Value) -> StoreResult<CredentialRecord> {
    serde_json::from_value(tokens).map_err(|e| {
        StoreError::corrupt(format!("tokens for account `{}`: {}", account_id, e))
    })
}

impl TokenStore for PgTokenStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn ensure_schema(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(with_timeout(
            "ensure_schema",
            self.timeout,
            self.create_table(),
        ))
    }

    fn get<'a>(
        &'a self,
        account_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<CredentialRecord>>> {
        Box::pin(with_timeout("get", self.timeout, self.fetch(account_id)))
    }

    fn upsert<'a>(
        &'a self,
        account_id: &'a str,
        record: CredentialRecord,
    ) -> BoxFuture<'a, StoreResult<CredentialRecord>> {
        Box::pin(with_timeout(
            "upsert",
            self.timeout,
            self.store(account_id, record),
        ))
    }
}
