//! Calendar event and request types.
//!
//! [`CalendarEvent`] is the normalized event shape returned to callers. It
//! keeps the provider's camelCase field names so that existing clients of the
//! REST surface can consume it unchanged. The request types describe the four
//! gateway operations independently of any HTTP framing.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Calendar used when the caller does not name one.
pub const DEFAULT_CALENDAR_ID: &str = "primary";

/// Page size used when the caller does not ask for one.
pub const DEFAULT_MAX_RESULTS: u32 = 25;

/// Largest `maxResults` the provider accepts for a single listing.
pub const MAX_RESULTS_CEILING: u32 = 2500;

fn default_calendar_id() -> String {
    DEFAULT_CALENDAR_ID.to_string()
}

/// Start or end of an event.
///
/// Timed events carry `date_time`; all-day events carry `date`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    /// Creates a timed event boundary.
    pub fn at(date_time: DateTime<FixedOffset>) -> Self {
        Self {
            date_time: Some(date_time),
            ..Default::default()
        }
    }

    /// Creates an all-day event boundary.
    pub fn on(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Default::default()
        }
    }

    /// Returns true if this is an all-day boundary.
    pub fn is_all_day(&self) -> bool {
        self.date_time.is_none() && self.date.is_some()
    }

    /// Returns the boundary as a UTC instant, all-day dates at midnight UTC.
    pub fn as_utc(&self) -> Option<DateTime<Utc>> {
        match (self.date_time, self.date) {
            (Some(dt), _) => Some(dt.with_timezone(&Utc)),
            (None, Some(date)) => Some(date.and_time(NaiveTime::MIN).and_utc()),
            (None, None) => None,
        }
    }
}

/// A calendar event as returned to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    /// Provider-assigned identifier.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<EventTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EventTime>,
    /// Recurrence lines (RRULE, EXDATE, ...) exactly as the provider stores them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recurrence: Vec<String>,
    /// Set on expanded instances of a recurring event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl CalendarEvent {
    /// Returns the start as a UTC instant, all-day dates at midnight UTC.
    ///
    /// Not an ordering key across time zones: the provider orders all-day
    /// events by the calendar's local date.
    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        self.start.as_ref().and_then(EventTime::as_utc)
    }

    /// Returns true if this event is an instance of a recurring series.
    pub fn is_recurring_instance(&self) -> bool {
        self.recurring_event_id.is_some()
    }
}

/// Parameters for listing events in a time window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEventsQuery {
    pub calendar_id: String,
    pub time_min: DateTime<FixedOffset>,
    pub time_max: DateTime<FixedOffset>,
    pub max_results: u32,
}

impl ListEventsQuery {
    /// Creates a query over the default calendar with the default page size.
    pub fn new(time_min: DateTime<FixedOffset>, time_max: DateTime<FixedOffset>) -> Self {
        Self {
            calendar_id: default_calendar_id(),
            time_min,
            time_max,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// Builder: set the calendar.
    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    /// Builder: set the maximum number of events.
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    /// Returns `max_results` clamped to what the provider accepts.
    pub fn effective_max_results(&self) -> u32 {
        self.max_results.clamp(1, MAX_RESULTS_CEILING)
    }
}

/// A new event to create.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// Recurrence rule lines, passed to the provider verbatim.
    #[serde(default)]
    pub recurrence: Option<Vec<String>>,
}

impl NewEvent {
    /// Creates a new event on the default calendar.
    pub fn new(
        summary: impl Into<String>,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            calendar_id: default_calendar_id(),
            summary: summary.into(),
            description: None,
            start,
            end,
            recurrence: None,
        }
    }

    /// Builder: set the calendar.
    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder: set the recurrence lines.
    pub fn with_recurrence<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recurrence = Some(rules.into_iter().map(Into::into).collect());
        self
    }
}

/// Fields to change on an existing event.
///
/// `None` leaves the provider's value untouched. `Some(String::new())` is
/// sent as an empty value and clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventChanges {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub end: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub recurrence: Option<Vec<String>>,
}

impl EventChanges {
    /// Returns true if no field is being changed.
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.description.is_none()
            && self.start.is_none()
            && self.end.is_none()
            && self.recurrence.is_none()
    }
}

/// A partial update of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPatch {
    pub calendar_id: String,
    pub event_id: String,
    pub changes: EventChanges,
}

impl EventPatch {
    /// Creates an empty patch for an event on the default calendar.
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            calendar_id: default_calendar_id(),
            event_id: event_id.into(),
            changes: EventChanges::default(),
        }
    }

    /// Builder: set the calendar.
    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    /// Builder: replace the change set.
    pub fn with_changes(mut self, changes: EventChanges) -> Self {
        self.changes = changes;
        self
    }

    /// Builder: change the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.changes.summary = Some(summary.into());
        self
    }

    /// Builder: change the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.changes.description = Some(description.into());
        self
    }
}

/// Identifies one event on one calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef {
    pub calendar_id: String,
    pub event_id: String,
}

impl EventRef {
    /// Creates a reference to an event on the given calendar.
    pub fn new(calendar_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            event_id: event_id.into(),
        }
    }
}
