//! Booking operations: book, confirm, cancel, reschedule.
//!
//! Lookups for cancel/reschedule go through the **identity key**
//! (attendee email + originally booked start) rather than the opaque
//! calendar event id — the conversational caller cannot reliably retain
//! an id across turns, and the identity key is stamped on the event as
//! a queryable private property at creation time.
//!
//! Status machine per booking:
//! `pending_confirmation -> confirmed` (confirm, idempotent),
//! `pending_confirmation | confirmed -> canceled` (cancel, idempotent),
//! start-time self-loop on a live booking (reschedule).  `canceled` is
//! terminal.

pub mod store;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::calendar::{CalendarError, CalendarPort, EventDraft};
use crate::notify::Notifier;
use crate::schedule::slots::{free_slots, SlotParams};
use crate::schedule::{now_in, TimeError, TimeWindow};
use store::BookingStore;

// ── Identity key ─────────────────────────────────────────────

/// Durable lookup key for a booking: lowercased attendee email plus the
/// booked start instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    email: String,
    start: DateTime<Tz>,
}

impl IdentityKey {
    pub fn new(email: &str, start: DateTime<Tz>) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            start,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn start(&self) -> DateTime<Tz> {
        self.start
    }

    /// Canonical start representation used in the store and as part of
    /// the event property — stable because every instant is normalised
    /// to the business timezone first.
    pub fn start_canonical(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    /// Value stamped on the calendar event's private property.
    pub fn property_value(&self) -> String {
        format!("{}|{}", self.email, self.start_canonical())
    }
}

// ── Status + record ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    PendingConfirmation,
    Confirmed,
    Canceled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingConfirmation => "pending_confirmation",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Canceled => "canceled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending_confirmation" => Some(BookingStatus::PendingConfirmation),
            "confirmed" => Some(BookingStatus::Confirmed),
            "canceled" => Some(BookingStatus::Canceled),
            _ => None,
        }
    }
}

/// One row of the booking log.
#[derive(Debug, Clone)]
pub struct BookingRecord {
    /// Generated booking id — the confirmation-link key.
    pub id: String,
    pub identity: IdentityKey,
    /// External calendar event id, once created.
    pub event_id: Option<String>,
    pub summary: String,
    pub description: String,
    pub status: BookingStatus,
}

// ── Errors ───────────────────────────────────────────────────

/// Lead-time policy violations.  Recoverable: the tool layer renders
/// these as an explanation to the user, never a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    /// Requested start is not in the future.
    Past,
    /// Requested start falls on the current business day.  Deliberate
    /// lead-time policy, not a technical limit.
    SameDay,
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::Past => write!(f, "the requested time is in the past"),
            PolicyViolation::SameDay => {
                write!(f, "same-day bookings are not accepted; please pick a later date")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("booking policy violation: {0}")]
    Policy(PolicyViolation),
    #[error("requested slot is no longer available")]
    SlotUnavailable,
    #[error("no matching appointment found")]
    NotFound,
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    #[error(transparent)]
    Time(#[from] TimeError),
    #[error("booking store failure: {0}")]
    Store(#[from] anyhow::Error),
}

// ── Booking request ──────────────────────────────────────────

/// Validated high-level booking request produced by the tool layer.
#[derive(Debug, Clone)]
pub struct BookRequest {
    pub full_name: String,
    pub email: String,
    pub company: String,
    pub start: DateTime<Tz>,
    pub goal: String,
}

// ── Bookings service ─────────────────────────────────────────

/// Booking engine over a calendar port and the booking log.
pub struct Bookings {
    calendar: Arc<dyn CalendarPort>,
    store: BookingStore,
    notifier: Arc<dyn Notifier>,
    tz: Tz,
    slots: SlotParams,
    /// Re-run the past/same-day guard on reschedule targets.  Off by
    /// default: reschedules are typically human-assisted.
    revalidate_reschedule: bool,
}

impl Bookings {
    pub fn new(
        calendar: Arc<dyn CalendarPort>,
        store: BookingStore,
        notifier: Arc<dyn Notifier>,
        tz: Tz,
        slots: SlotParams,
        revalidate_reschedule: bool,
    ) -> Self {
        Self {
            calendar,
            store,
            notifier,
            tz,
            slots,
            revalidate_reschedule,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn slot_params(&self) -> &SlotParams {
        &self.slots
    }

    fn slot_window(&self, start: DateTime<Tz>) -> Result<TimeWindow, BookingError> {
        Ok(TimeWindow::from_start(
            start,
            Duration::minutes(self.slots.slot_minutes),
        )?)
    }

    fn guard_lead_time(&self, start: DateTime<Tz>) -> Result<(), BookingError> {
        let now = now_in(self.tz);
        if start <= now {
            return Err(BookingError::Policy(PolicyViolation::Past));
        }
        if start.date_naive() == now.date_naive() {
            return Err(BookingError::Policy(PolicyViolation::SameDay));
        }
        Ok(())
    }

    // -- availability --------------------------------------------------------

    /// Free slot starts on `date`, reading busy intervals live from the
    /// calendar (no cache — the calendar is the source of truth).
    pub async fn free_slots_on(&self, date: NaiveDate) -> Result<Vec<DateTime<Tz>>, BookingError> {
        let day = TimeWindow::new(
            crate::schedule::local_at(date, self.slots.working_hours.start_hour, 0, self.tz)?,
            crate::schedule::local_at(date, self.slots.working_hours.end_hour, 0, self.tz)?,
        )?;
        let busy = self.calendar.list_busy(&day).await?;
        Ok(free_slots(date, &busy, &self.slots, self.tz)?)
    }

    // -- book ----------------------------------------------------------------

    /// Book a new appointment.
    ///
    /// Guards the lead-time policy, verifies the slot is still free
    /// against live calendar state, creates exactly one event stamped
    /// with the identity key, and logs a `pending_confirmation` row.
    pub async fn book(&self, req: &BookRequest) -> Result<BookingRecord, BookingError> {
        self.guard_lead_time(req.start)?;

        let window = self.slot_window(req.start)?;
        let busy = self.calendar.list_busy(&window).await?;
        if busy.iter().any(|b| window.overlaps(b)) {
            return Err(BookingError::SlotUnavailable);
        }

        let identity = IdentityKey::new(&req.email, req.start);
        let summary = format!("Onboarding call with {}", req.company);
        let description = format!(
            "Call with {} from {}.\n\nStated goal: {}",
            req.full_name, req.company, req.goal
        );
        let event_id = self
            .calendar
            .create_event(&EventDraft {
                window,
                summary: summary.clone(),
                description: description.clone(),
                attendees: vec![identity.email().to_string()],
                identity: identity.clone(),
            })
            .await?;

        let record = BookingRecord {
            id: Uuid::new_v4().to_string(),
            identity,
            event_id: Some(event_id),
            summary,
            description,
            status: BookingStatus::PendingConfirmation,
        };
        self.store.upsert(&record)?;
        info!(
            booking = %record.id,
            email = %record.identity.email(),
            start = %record.identity.start_canonical(),
            "booking created, awaiting confirmation"
        );
        self.notifier.booking_pending(&record).await;
        Ok(record)
    }

    // -- confirm -------------------------------------------------------------

    /// Confirm a pending booking.  Idempotent: re-confirming a
    /// confirmed booking reports success.  If state drift left the
    /// calendar event missing, it is (re)created here.
    pub async fn confirm(&self, booking_id: &str) -> Result<BookingRecord, BookingError> {
        let mut record = self
            .store
            .get(booking_id)?
            .ok_or(BookingError::NotFound)?;

        match record.status {
            BookingStatus::Canceled => return Err(BookingError::NotFound),
            BookingStatus::Confirmed => return Ok(record),
            BookingStatus::PendingConfirmation => {}
        }

        if record.event_id.is_none() {
            warn!(booking = %record.id, "confirmed booking had no calendar event, creating one");
            let window = self.slot_window(record.identity.start())?;
            let event_id = self
                .calendar
                .create_event(&EventDraft {
                    window,
                    summary: record.summary.clone(),
                    description: record.description.clone(),
                    attendees: vec![record.identity.email().to_string()],
                    identity: record.identity.clone(),
                })
                .await?;
            record.event_id = Some(event_id);
            self.store.upsert(&record)?;
        }

        self.store.set_status(&record.id, BookingStatus::Confirmed)?;
        record.status = BookingStatus::Confirmed;
        info!(booking = %record.id, "booking confirmed");
        Ok(record)
    }

    // -- cancel --------------------------------------------------------------

    /// Cancel by identity key.  Deleting an event the backend already
    /// lost is success; cancelling an already-canceled booking is
    /// success.  Only a booking nobody has heard of is `NotFound`.
    pub async fn cancel(&self, key: &IdentityKey) -> Result<(), BookingError> {
        match self.store.find_by_identity(key)? {
            Some(record) => {
                if record.status == BookingStatus::Canceled {
                    return Ok(());
                }
                if let Some(ref event_id) = record.event_id {
                    self.calendar.delete_event(event_id).await?;
                } else if let Some(event_id) = self.calendar.find_event(key).await? {
                    self.calendar.delete_event(&event_id).await?;
                }
                self.store.set_status(&record.id, BookingStatus::Canceled)?;
                info!(booking = %record.id, "booking canceled");
                Ok(())
            }
            None => match self.calendar.find_event(key).await? {
                Some(event_id) => {
                    self.calendar.delete_event(&event_id).await?;
                    info!(event = %event_id, "untracked event canceled via identity key");
                    Ok(())
                }
                None => Err(BookingError::NotFound),
            },
        }
    }

    // -- reschedule ----------------------------------------------------------

    /// Move an existing booking to `new_start`, preserving its email
    /// and calendar event id.  The target slot is always checked
    /// against live calendar state; the lead-time guard re-runs only
    /// when `revalidate_reschedule` is set.
    pub async fn reschedule(
        &self,
        key: &IdentityKey,
        new_start: DateTime<Tz>,
    ) -> Result<BookingRecord, BookingError> {
        if self.revalidate_reschedule {
            self.guard_lead_time(new_start)?;
        }
        let new_window = self.slot_window(new_start)?;

        // The target slot must be free; the booking's own current
        // window does not count against it.
        let current_window = self.slot_window(key.start())?;
        let busy = self.calendar.list_busy(&new_window).await?;
        if busy
            .iter()
            .any(|b| *b != current_window && new_window.overlaps(b))
        {
            return Err(BookingError::SlotUnavailable);
        }

        let record = self.store.find_by_identity(key)?;
        match record {
            Some(mut record) if record.status != BookingStatus::Canceled => {
                let event_id = match record.event_id.clone() {
                    Some(id) => id,
                    None => self
                        .calendar
                        .find_event(key)
                        .await?
                        .ok_or(BookingError::NotFound)?,
                };
                self.calendar.update_event(&event_id, &new_window).await?;
                record.identity = IdentityKey::new(record.identity.email(), new_start);
                record.event_id = Some(event_id);
                self.store.upsert(&record)?;
                info!(
                    booking = %record.id,
                    new_start = %record.identity.start_canonical(),
                    "booking rescheduled"
                );
                Ok(record)
            }
            _ => match self.calendar.find_event(key).await? {
                // The event exists but the log lost track of it —
                // move it and re-adopt it into the log.
                Some(event_id) => {
                    self.calendar.update_event(&event_id, &new_window).await?;
                    let record = BookingRecord {
                        id: Uuid::new_v4().to_string(),
                        identity: IdentityKey::new(key.email(), new_start),
                        event_id: Some(event_id),
                        summary: String::new(),
                        description: String::new(),
                        status: BookingStatus::Confirmed,
                    };
                    self.store.upsert(&record)?;
                    Ok(record)
                }
                None => Err(BookingError::NotFound),
            },
        }
    }
}
