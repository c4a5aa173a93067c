//! Calendar port — the external calendar is the system of record for
//! bookings.
//!
//! The [`CalendarPort`] trait is the only surface the booking engine
//! sees: read busy intervals, create/update/delete events, and find an
//! event by its stamped identity key.  Two implementations exist:
//! [`remote::RemoteCalendar`] (HTTP, Google Calendar-shaped API) and
//! [`local::LocalCalendar`] (in-memory, for `provider: local` config
//! and tests).

pub mod local;
pub mod remote;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalCalendar;
pub use remote::RemoteCalendar;

use crate::booking::IdentityKey;
use crate::schedule::TimeWindow;

/// Name of the private event property carrying the attendee identity
/// key.  Queryable server-side, so cancel/reschedule lookups never
/// depend on free-text search over event descriptions.
pub const IDENTITY_PROPERTY: &str = "attendee_key";

/// Failures talking to the calendar backend.  All of these are the
/// "external service" class: callers log them and surface a generic
/// message, never the raw detail.
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("calendar API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("calendar payload malformed: {0}")]
    Decode(String),
}

/// A new event to create, carrying everything the booking engine knows.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub window: TimeWindow,
    pub summary: String,
    pub description: String,
    pub attendees: Vec<String>,
    /// Stamped on the event as the [`IDENTITY_PROPERTY`] private
    /// property so it can be found again without the opaque event id.
    pub identity: IdentityKey,
}

/// Read/write operations against the external calendar.
#[async_trait]
pub trait CalendarPort: Send + Sync {
    /// Busy intervals overlapping `window`, normalised to the business
    /// timezone.  Order is not guaranteed.
    async fn list_busy(&self, window: &TimeWindow) -> Result<Vec<TimeWindow>, CalendarError>;

    /// Create an event; returns the backend's opaque event id.
    async fn create_event(&self, draft: &EventDraft) -> Result<String, CalendarError>;

    /// Move an existing event to a new interval.
    async fn update_event(&self, event_id: &str, window: &TimeWindow)
        -> Result<(), CalendarError>;

    /// Delete an event.  Deleting an id the backend no longer knows is
    /// success, not failure — external state drift is expected.
    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError>;

    /// Find the event stamped with `key`, if any.
    async fn find_event(&self, key: &IdentityKey) -> Result<Option<String>, CalendarError>;
}
