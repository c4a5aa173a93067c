//! Free-slot search over a day's busy intervals.
//!
//! Candidate starts are generated at a fixed granularity across the
//! working hours; a candidate survives when its `[start, start+len)`
//! window fits inside the day and touches no busy interval.  The
//! granularity and the slot length are deliberately independent knobs:
//! a 15-minute grid can carry 60-minute appointments.

use chrono::{DateTime, Duration, NaiveDate};
use chrono_tz::Tz;

use super::{local_at, TimeError, TimeWindow, WorkingHours};

/// Slot-search parameters, sourced from configuration.
#[derive(Debug, Clone, Copy)]
pub struct SlotParams {
    /// Appointment length in minutes.
    pub slot_minutes: i64,
    /// Spacing between candidate starts in minutes.
    pub granularity_minutes: i64,
    pub working_hours: WorkingHours,
}

impl Default for SlotParams {
    fn default() -> Self {
        Self {
            slot_minutes: 60,
            granularity_minutes: 60,
            working_hours: WorkingHours::default(),
        }
    }
}

/// Compute the free slot starts on `date`.
///
/// `busy` intervals are assumed normalised to the business timezone.
/// An empty result means "no availability" and is not an error.
pub fn free_slots(
    date: NaiveDate,
    busy: &[TimeWindow],
    params: &SlotParams,
    tz: Tz,
) -> Result<Vec<DateTime<Tz>>, TimeError> {
    params.working_hours.validate()?;

    let day_open = local_at(date, params.working_hours.start_hour, 0, tz)?;
    let day_close = local_at(date, params.working_hours.end_hour, 0, tz)?;
    let slot_len = Duration::minutes(params.slot_minutes);
    let step = Duration::minutes(params.granularity_minutes.max(1));

    let mut free = Vec::new();
    let mut cursor = day_open;
    while cursor + slot_len <= day_close {
        let candidate = TimeWindow::from_start(cursor, slot_len)?;
        if !busy.iter().any(|b| candidate.overlaps(b)) {
            free.push(cursor);
        }
        cursor += step;
    }
    Ok(free)
}
