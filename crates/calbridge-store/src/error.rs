//! Token store error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for token store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing credentials.
///
/// "Not found" is never an error: [`crate::TokenStore::get`] returns `None`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached, or the call timed out.
    #[error("token store unavailable: {message}")]
    Unavailable { message: String },

    /// Persisted data could not be parsed back into a credential record.
    #[error("token store data is corrupt: {message}")]
    Corrupt { message: String },

    /// The store configuration is invalid.
    #[error("token store configuration error: {message}")]
    Config { message: String },
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a corrupt-data error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates the error reported when a store call exceeds its deadline.
    pub fn timed_out(operation: &str, timeout: Duration) -> Self {
        Self::unavailable(format!(
            "{} timed out after {}ms",
            operation,
            timeout.as_millis()
        ))
    }

    /// Returns true if retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Decode(e) => Self::corrupt(e.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::corrupt(format!("column {}: {}", index, source))
            }
            sqlx::Error::Configuration(e) => Self::config(e.to_string()),
            other => Self::unavailable(other.to_string()),
        }
    }
}
