//! CalendarGateway trait definition.
//!
//! The gateway is the only component that talks to the calendar provider's
//! event API. It receives an already-fresh [`UsableCredential`] and returns
//! normalized [`CalendarEvent`]s or a [`ProviderError`].

use calbridge_core::{BoxFuture, CalendarEvent, EventPatch, EventRef, ListEventsQuery, NewEvent};

use crate::error::ProviderResult;
use crate::google::UsableCredential;

/// Event operations against a calendar provider.
///
/// # Implementation Notes
///
/// - `list_events` returns events ordered by start, at most
///   `query.effective_max_results()` of them, following pagination
/// - `update_event` sends only the fields present in the patch
/// - `delete_event` reports a missing event as an error, never as success
pub trait CalendarGateway: Send + Sync {
    /// Returns the provider name (e.g. "google").
    fn name(&self) -> &str;

    /// Lists events in a time window.
    fn list_events<'a>(
        &'a self,
        credential: &'a UsableCredential,
        query: ListEventsQuery,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarEvent>>>;

    /// Creates an event and returns it with its provider-assigned id.
    fn create_event<'a>(
        &'a self,
        credential: &'a UsableCredential,
        event: NewEvent,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>>;

    /// Applies a partial update and returns the updated event.
    fn update_event<'a>(
        &'a self,
        credential: &'a UsableCredential,
        patch: EventPatch,
    ) -> BoxFuture<'a, ProviderResult<CalendarEvent>>;

    /// Deletes an event.
    fn delete_event<'a>(
        &'a self,
        credential: &'a UsableCredential,
        event: EventRef,
    ) -> BoxFuture<'a, ProviderResult<()>>;
}
