//! Backend selection.
//!
//! The relational backend is chosen when database connection variables are
//! present, otherwise credentials live in a JSON file in the data directory.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::postgres::PgConnectOptions;

use crate::error::{StoreError, StoreResult};

/// File name of the JSON token file inside the data directory.
pub const TOKEN_FILE_NAME: &str = "tokens.local.json";

/// PostgreSQL connection settings.
#[derive(Clone, PartialEq, Eq)]
pub enum DatabaseConfig {
    /// A full connection string (`DATABASE_URL`).
    Url(String),
    /// Discrete `PG*` settings.
    Parts {
        host: String,
        port: Option<u16>,
        database: String,
        user: String,
        password: Option<String>,
    },
}

impl DatabaseConfig {
    /// Builds sqlx connect options from these settings.
    pub fn connect_options(&self) -> StoreResult<PgConnectOptions> {
        match self {
            Self::Url(url) => PgConnectOptions::from_str(url)
                .map_err(|e| StoreError::config(format!("invalid DATABASE_URL: {}", e))),
            Self::Parts {
                host,
                port,
                database,
                user,
                password,
            } => {
                let mut options = PgConnectOptions::new()
                    .host(host)
                    .database(database)
                    .username(user);
                if let Some(port) = port {
                    options = options.port(*port);
                }
                if let Some(password) = password {
                    options = options.password(password);
                }
                Ok(options)
            }
        }
    }
}

// Connection strings carry passwords.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(_) => f.write_str("DatabaseConfig::Url(<redacted>)"),
            Self::Parts {
                host,
                port,
                database,
                user,
                ..
            } => f
                .debug_struct("DatabaseConfig::Parts")
                .field("host", host)
                .field("port", port)
                .field("database", database)
                .field("user", user)
                .finish_non_exhaustive(),
        }
    }
}

/// Which token store backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    /// PostgreSQL `user_tokens` table.
    Postgres(DatabaseConfig),
    /// JSON file at the given path.
    File { path: PathBuf },
}

impl StoreConfig {
    /// File backend in `data_dir`.
    pub fn file_in(data_dir: impl AsRef<Path>) -> Self {
        Self::File {
            path: data_dir.as_ref().join(TOKEN_FILE_NAME),
        }
    }

    /// Selects the backend from configuration variables.
    ///
    /// `DATABASE_URL`, or `PGHOST` + `PGDATABASE` + `PGUSER` together, select
    /// PostgreSQL. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F, data_dir: impl AsRef<Path>) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            return Ok(Self::Postgres(DatabaseConfig::Url(url)));
        }

        if let (Some(host), Some(database), Some(user)) =
            (get("PGHOST"), get("PGDATABASE"), get("PGUSER"))
        {
            let port = match get("PGPORT") {
                Some(raw) => Some(raw.trim().parse::<u16>().map_err(|e| {
                    StoreError::config(format!("invalid PGPORT `{}`: {}", raw, e))
                })?),
                None => None,
            };
            return Ok(Self::Postgres(DatabaseConfig::Parts {
                host,
                port,
                database,
                user,
                password: get("PGPASSWORD"),
            }));
        }

        Ok(Self::file_in(data_dir))
    }

    /// Returns the backend name reported in logs and health checks.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::File { .. } => "file",
        }
    }
}
