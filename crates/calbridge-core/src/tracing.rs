//! Tracing setup for calbridge
//!
//! One subscriber configuration shared by the server binary and its
//! maintenance subcommands.
//!
//! ```ignore
//! use calbridge_core::tracing::{init_tracing, TracingConfig, TracingOutputFormat};
//!
//! init_tracing(TracingConfig::server().with_format(TracingOutputFormat::Json))?;
//! ```

use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Errors that can occur during tracing initialization
#[derive(Debug, Error)]
pub enum TracingError {
    /// Failed to set global subscriber
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    /// Failed to parse env filter directive
    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// Output format for tracing logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format (default)
    #[default]
    Compact,
    /// JSON lines, for log shippers
    Json,
}

impl FromStr for TracingOutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format `{}` (expected pretty, compact or json)",
                other
            )),
        }
    }
}

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// The level applied to calbridge and HTTP access logs when RUST_LOG is not set
    pub default_level: Level,
    /// Output format for log messages
    pub output_format: TracingOutputFormat,
    /// Whether to include file/line information in logs
    pub include_location: bool,
    /// Whether to include target (module path) in logs
    pub include_target: bool,
    /// Whether to include span close events (request durations)
    pub include_span_events: bool,
    /// Custom env filter directive (overrides default_level if set)
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::server()
    }
}

impl TracingConfig {
    /// Config for the long-running HTTP server.
    #[must_use]
    pub fn server() -> Self {
        Self {
            default_level: Level::INFO,
            output_format: TracingOutputFormat::Compact,
            include_location: false,
            include_target: true,
            include_span_events: false,
            env_filter: None,
        }
    }

    /// Config for one-shot maintenance commands run with `--debug`.
    #[must_use]
    pub fn cli_debug() -> Self {
        Self {
            default_level: Level::DEBUG,
            output_format: TracingOutputFormat::Compact,
            include_location: true,
            include_target: true,
            include_span_events: false,
            env_filter: None,
        }
    }

    /// Set the default log level
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set the output format
    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Set a custom env filter directive
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// The filter directive used when neither `env_filter` nor RUST_LOG is set.
    pub fn default_directive(&self) -> String {
        format!(
            "calbridge={level},tower_http={level}",
            level = self.default_level
        )
    }
}

/// Initialize tracing with the given configuration.
///
/// Call once at process start. `RUST_LOG` overrides the default directive.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set or if
/// the env filter directive is invalid.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let env_filter = match config.env_filter {
        Some(ref filter) => EnvFilter::try_new(filter)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.default_directive())),
    };

    let span_events = if config.include_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.output_format {
        TracingOutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target)
            .with_span_events(span_events)
            .boxed(),
        TracingOutputFormat::Compact => fmt::layer()
            .compact()
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target)
            .with_span_events(span_events)
            .boxed(),
        TracingOutputFormat::Json => fmt::layer()
            .json()
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target)
            .with_span_events(span_events)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(env_filter).with(layer);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_is_default() {
        let config = TracingConfig::default();
        assert_eq!(config.default_level, Level::INFO);
        assert_eq!(config.output_format, TracingOutputFormat::Compact);
        assert!(!config.include_location);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn cli_debug_config() {
        let config = TracingConfig::cli_debug();
        assert_eq!(config.default_level, Level::DEBUG);
        assert!(config.include_location);
    }

    #[test]
    fn default_directive_covers_http_layer() {
        let config = TracingConfig::server().with_level(Level::WARN);
        assert_eq!(config.default_directive(), "calbridge=WARN,tower_http=WARN");
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!(
            "json".parse::<TracingOutputFormat>().unwrap(),
            TracingOutputFormat::Json
        );
        assert_eq!(
            "Pretty".parse::<TracingOutputFormat>().unwrap(),
            TracingOutputFormat::Pretty
        );
        assert!("xml".parse::<TracingOutputFormat>().is_err());
    }

    #[test]
    fn builder_methods() {
        let config = TracingConfig::server()
            .with_format(TracingOutputFormat::Json)
            .with_env_filter("calbridge=trace");

        assert_eq!(config.output_format, TracingOutputFormat::Json);
        assert_eq!(config.env_filter, Some("calbridge=trace".to_string()));
    }
}
