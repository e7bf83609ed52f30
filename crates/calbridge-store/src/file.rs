//! JSON file token store.
//!
//! The file holds one JSON object mapping account identifiers to records:
//!
//! ```json
//! { "default": { "access_token": "...", "refresh_token": "...", ... } }
//! ```
//!
//! Entries are kept as raw JSON so that a write for one account never
//! rewrites another account's entry through a lossy parse.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use calbridge_core::{BoxFuture, CredentialRecord};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::{DEFAULT_STORE_TIMEOUT, TokenStore, next_update_stamp, with_timeout};

/// What was found on disk.
enum FileContents {
    Missing,
    Parsed(Map<String, Value>),
    /// Present but not a JSON object. Treated as empty.
    Unreadable,
}

impl FileContents {
    fn into_entries(self) -> Map<String, Value> {
        match self {
            Self::Parsed(entries) => entries,
            Self::Missing | Self::Unreadable => Map::new(),
        }
    }
}

/// Token store backed by a single JSON file.
///
/// Writes are serialized within the process and land atomically through a
/// temporary sibling file and `rename`.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    timeout: Duration,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    /// Creates a store for the file at `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_STORE_TIMEOUT,
            write_lock: Mutex::new(()),
        }
    }

    /// Builder: set the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the token file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where an unreadable token file is moved before it is overwritten.
    pub fn corrupt_backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn load(&self) -> StoreResult<FileContents> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no token file yet");
                return Ok(FileContents::Missing);
            }
            Err(e) => {
                return Err(StoreError::unavailable(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(entries)) => Ok(FileContents::Parsed(entries)),
            Ok(_) => {
                warn!(path = %self.path.display(), "token file is not a JSON object, treating as empty");
                Ok(FileContents::Unreadable)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token file is not valid JSON, treating as empty");
                Ok(FileContents::Unreadable)
            }
        }
    }

    async fn read_record(&self, account_id: &str) -> StoreResult<Option<CredentialRecord>> {
        let entries = self.load().await?.into_entries();
        let Some(entry) = entries.get(account_id) else {
            return Ok(None);
        };

        match serde_json::from_value::<CredentialRecord>(entry.clone()) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(account_id, error = %e, "ignoring unparseable token entry");
                Ok(None)
            }
        }
    }

    async fn write_record(
        &self,
        account_id: &str,
        mut record: CredentialRecord,
    ) -> StoreResult<CredentialRecord> {
        let _guard = self.write_lock.lock().await;

        let contents = self.load().await?;
        if matches!(contents, FileContents::Unreadable) {
            let backup = self.corrupt_backup_path();
            fs::rename(&self.path, &backup).await.map_err(|e| {
                StoreError::unavailable(format!(
                    "failed to move unreadable token file to {}: {}",
                    backup.display(),
                    e
                ))
            })?;
            warn!(backup = %backup.display(), "preserved unreadable token file before overwrite");
        }

        let mut entries = contents.into_entries();
        let previous = entries.get(account_id).and_then(stored_stamp);
        record.updated_at = next_update_stamp(previous, Utc::now());

        let value = serde_json::to_value(&record)
            .map_err(|e| StoreError::unavailable(format!("failed to serialize record: {}", e)))?;
        entries.insert(account_id.to_string(), value);

        self.write_atomic(&entries).await?;
        debug!(account_id, path = %self.path.display(), "saved credential record");
        Ok(record)
    }

    async fn write_atomic(&self, entries: &Map<String, Value>) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::unavailable(format!("failed to serialize tokens: {}", e)))?;

        let temp_path = self.temp_path();
        fs::write(&temp_path, content.as_bytes())
            .await
            .map_err(|e| StoreError::unavailable(format!("failed to write token file: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(&temp_path, perms).await.map_err(|e| {
                StoreError::unavailable(format!("failed to restrict token file: {}", e))
            })?;
        }

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StoreError::unavailable(format!("failed to replace token file: {}", e)))
    }

    async fn create_parent(&self) -> StoreResult<()> {
        let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        fs::create_dir_all(parent).await.map_err(|e| {
            StoreError::unavailable(format!(
                "failed to create token directory {}: {}",
                parent.display(),
                e
            ))
        })?;
        info!(path = %self.path.display(), "token file location ready");
        Ok(())
    }
}

fn stored_stamp(entry: &Value) -> Option<DateTime<Utc>> {
    entry
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl TokenStore for FileTokenStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn ensure_schema(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(with_timeout(
            "ensure_schema",
            self.timeout,
            self.create_parent(),
        ))
    }

    fn get<'a>(
        &'a self,
        account_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<CredentialRecord>>> {
        Box::pin(with_timeout("get", self.timeout, self.read_record(account_id)))
    }

    fn upsert<'a>(
        &'a self,
        account_id: &'a str,
        record: CredentialRecord,
    ) -> BoxFuture<'a, StoreResult<CredentialRecord>> {
        Box::pin(with_timeout(
            "upsert",
            self.timeout,
            self.write_record(account_id, record),
        ))
    }
}
