//! Calendar provider plumbing.
//!
//! This crate sits between the HTTP surface and Google:
//!
//! - [`CalendarGateway`] - event operations, implemented by
//!   [`google::GoogleCalendarClient`]
//! - [`google::CredentialManager`] - refresh-before-use for stored credentials
//! - [`ProviderError`] - error taxonomy for provider operations
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  get   ┌───────────────────┐ refresh ┌─────────────┐
//! │ TokenStore │ ─────▶ │ CredentialManager │ ──────▶ │ OAuthClient │
//! │            │ ◀───── │                   │         └─────────────┘
//! └────────────┘ upsert └─────────┬─────────┘
//!                                 │ UsableCredential
//!                                 ▼
//!                      ┌──────────────────────┐
//!                      │ GoogleCalendarClient │ ──▶ Calendar API v3
//!                      └──────────────────────┘
//! ```

pub mod error;
pub mod gateway;
pub mod google;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use gateway::CalendarGateway;
