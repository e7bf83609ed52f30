//! calbridge entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use calbridge_core::{TracingConfig, TracingOutputFormat, init_tracing};
use calbridge_server::config::dotenv_problem;
use calbridge_server::{ServerConfig, ServerError, ServerResult};
use calbridge_store::{DEFAULT_STORE_TIMEOUT, StoreConfig};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

/// calbridge - Google Calendar over a small REST API
#[derive(Debug, Parser)]
#[command(name = "calbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    debug: bool,

    /// Log format: pretty, compact or json
    #[arg(long, env = "CALBRIDGE_LOG_FORMAT", default_value = "compact", global = true)]
    log_format: TracingOutputFormat,

    /// Directory holding the file token store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve {
        /// Interface to bind, overrides HOST
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },

    /// Create the token store table or directory, then exit
    EnsureSchema,

    /// Show whether the account is authorized, without printing tokens
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Loaded before parsing so `.env` can feed clap's env fallbacks.
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    let tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::server()
    };
    if let Err(e) = init_tracing(tracing_config.with_format(cli.log_format)) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }
    if let Some(problem) = dotenv_problem(&dotenv) {
        warn!(error = %problem, "ignoring unreadable .env file");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    match cli.command {
        None => serve(cli.data_dir, None, None).await,
        Some(Command::Serve { host, port }) => serve(cli.data_dir, host, port).await,
        Some(Command::EnsureSchema) => ensure_schema(cli.data_dir).await,
        Some(Command::Status) => status(cli.data_dir).await,
    }
}

async fn serve(data_dir: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> ServerResult<()> {
    let mut config = ServerConfig::from_env(data_dir)?;
    if let Some(host) = host {
        config = config.with_host(host);
    }
    if let Some(port) = port {
        config = config.with_port(port);
    }
    calbridge_server::serve(config).await
}

/// Store settings only, so maintenance commands work without OAuth variables.
fn store_settings(data_dir: Option<PathBuf>) -> ServerResult<(StoreConfig, Duration)> {
    let lookup = |key: &str| std::env::var(key).ok();
    let data_dir = data_dir
        .or_else(|| lookup("CALBRIDGE_DATA_DIR").filter(|d| !d.trim().is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let store = StoreConfig::from_lookup(lookup, &data_dir)?;

    let timeout = match lookup("CALBRIDGE_STORE_TIMEOUT_SECS") {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                ServerError::config(format!("invalid CALBRIDGE_STORE_TIMEOUT_SECS `{}`", raw))
            })?,
        None => DEFAULT_STORE_TIMEOUT,
    };
    Ok((store, timeout))
}

async fn ensure_schema(data_dir: Option<PathBuf>) -> ServerResult<()> {
    let (config, timeout) = store_settings(data_dir)?;
    let store = calbridge_store::open(&config, timeout)?;
    store.ensure_schema().await?;
    info!(backend = store.backend(), "token store ready");
    println!("{} token store ready", store.backend());
    Ok(())
}

async fn status(data_dir: Option<PathBuf>) -> ServerResult<()> {
    let (config, timeout) = store_settings(data_dir)?;
    let account_id = std::env::var("CALBRIDGE_ACCOUNT_ID")
        .ok()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| calbridge_server::config::DEFAULT_ACCOUNT_ID.to_string());

    let store = calbridge_store::open(&config, timeout)?;
    let record = store.get(&account_id).await?;

    let report = match record.filter(|r| r.is_usable()) {
        Some(record) => json!({
            "account_id": account_id,
            "store": store.backend(),
            "authorized": true,
            "stale": record.is_stale_at(Utc::now()),
            "can_refresh": record.can_refresh(),
            "expires_at": record.expires_at,
            "scopes": record.scopes,
            "updated_at": record.updated_at,
        }),
        None => json!({
            "account_id": account_id,
            "store": store.backend(),
            "authorized": false,
        }),
    };

    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|e| ServerError::config(format!("failed to render status: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}
