//! Core types: credential records, calendar events, tracing

use std::future::Future;
use std::pin::Pin;

pub mod event;
pub mod record;
pub mod tracing;

pub use event::{
    CalendarEvent, EventChanges, EventPatch, EventRef, EventTime, ListEventsQuery, NewEvent,
    DEFAULT_CALENDAR_ID, DEFAULT_MAX_RESULTS, MAX_RESULTS_CEILING,
};
pub use record::{expiry_from_lifetime, parse_scope, CredentialRecord, DEFAULT_TOKEN_TYPE};
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};

/// A boxed future for async trait methods.
///
/// Storage and provider traits return boxed futures so they stay object-safe
/// and can be shared as `Arc<dyn Trait>` across request handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
