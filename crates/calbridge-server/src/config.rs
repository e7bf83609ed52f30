//! Server configuration.
//!
//! Built once at startup from an injectable lookup function, so tests never
//! touch the process environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use calbridge_providers::google::GoogleConfig;
use calbridge_store::{DEFAULT_STORE_TIMEOUT, StoreConfig};

use crate::error::{ServerError, ServerResult};

/// Listen address used when `HOST`/`PORT` are unset.
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;

/// Account identifier used when `CALBRIDGE_ACCOUNT_ID` is unset.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,

    /// Shared secret callers must present. `None` rejects every API call.
    pub api_key: Option<String>,

    /// The single account this deployment serves.
    pub account_id: String,

    /// Directory holding the file token store.
    pub data_dir: PathBuf,

    /// Deadline for every token store call.
    pub store_timeout: Duration,

    /// Selected token store backend.
    pub store: StoreConfig,

    /// Google OAuth and Calendar settings.
    pub google: GoogleConfig,
}

impl ServerConfig {
    /// Builds the configuration from variables supplied by `lookup`.
    ///
    /// `data_dir` overrides `CALBRIDGE_DATA_DIR` when given.
    pub fn from_lookup<F>(lookup: F, data_dir: Option<PathBuf>) -> ServerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| ServerError::config(format!("invalid PORT `{}`: {}", raw, e)))?,
            None => DEFAULT_PORT,
        };

        let data_dir = data_dir
            .or_else(|| get("CALBRIDGE_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));

        let store_timeout = secs(&get, "CALBRIDGE_STORE_TIMEOUT_SECS")?.unwrap_or(DEFAULT_STORE_TIMEOUT);

        let mut google = GoogleConfig::from_lookup(&lookup)?;
        if let Some(timeout) = secs(&get, "CALBRIDGE_HTTP_TIMEOUT_SECS")? {
            google = google.with_timeout(timeout);
        }

        let store = StoreConfig::from_lookup(&lookup, &data_dir)?;

        Ok(Self {
            host,
            port,
            api_key: get("ACTIONS_API_KEY"),
            account_id: get("CALBRIDGE_ACCOUNT_ID").unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string()),
            data_dir,
            store_timeout,
            store,
            google,
        })
    }

    /// Builds the configuration from the process environment.
    pub fn from_env(data_dir: Option<PathBuf>) -> ServerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), data_dir)
    }

    /// Builder: set the listen host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Builder: set the listen port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Returns the socket address to bind.
    pub fn bind_addr(&self) -> ServerResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                ServerError::config(format!(
                    "invalid listen address {}:{}: {}",
                    self.host, self.port, e
                ))
            })
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("account_id", &self.account_id)
            .field("data_dir", &self.data_dir)
            .field("store_timeout", &self.store_timeout)
            .field("store", &self.store)
            .field("google", &self.google)
            .finish()
    }
}

/// Describes a `.env` load failure worth reporting. A missing file is normal.
pub fn dotenv_problem(result: &Result<PathBuf, dotenvy::Error>) -> Option<String> {
    match result {
        Ok(_) => None,
        Err(e) if e.not_found() => None,
        Err(e) => Some(e.to_string()),
    }
}

fn secs<G>(get: &G, key: &str) -> ServerResult<Option<Duration>>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ServerError::config(format!("{} must be greater than zero", key))),
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(e) => Err(ServerError::config(format!("invalid {} `{}`: {}", key, raw, e))),
    }
}
