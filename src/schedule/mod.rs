//! Time-window model: half-open intervals in the business timezone.
//!
//! All wall-clock arithmetic in the booking engine happens in a single
//! configured IANA timezone.  External instants (RFC 3339 strings from
//! the calendar API or the model) are normalised into that zone before
//! any comparison, so overlap checks and same-day guards are immune to
//! offset drift.

pub mod slots;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Default business timezone when the config does not name one.
pub const DEFAULT_TIMEZONE: &str = "Africa/Johannesburg";

/// Errors from interval construction and timestamp parsing.
#[derive(Debug, Error)]
pub enum TimeError {
    #[error("interval start must precede end ({start} >= {end})")]
    EmptyWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("unrecognised timestamp: {0}")]
    BadTimestamp(String),
    #[error("wall-clock time {0} does not exist in the business timezone")]
    NonexistentLocalTime(NaiveDateTime),
    #[error("working hours invalid: start {start} must be before end {end}")]
    BadWorkingHours { start: u32, end: u32 },
}

// ── TimeWindow ───────────────────────────────────────────────

/// A half-open interval `[start, end)` in the business timezone.
///
/// Invariant: `start < end`, enforced at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Tz>,
    end: DateTime<Tz>,
}

impl TimeWindow {
    /// Create a window, rejecting empty or inverted intervals.
    pub fn new(start: DateTime<Tz>, end: DateTime<Tz>) -> Result<Self, TimeError> {
        if start >= end {
            return Err(TimeError::EmptyWindow {
                start: start.with_timezone(&Utc),
                end: end.with_timezone(&Utc),
            });
        }
        Ok(Self { start, end })
    }

    /// Window starting at `start` with the given duration.
    pub fn from_start(start: DateTime<Tz>, length: Duration) -> Result<Self, TimeError> {
        Self::new(start, start + length)
    }

    pub fn start(&self) -> DateTime<Tz> {
        self.start
    }

    pub fn end(&self) -> DateTime<Tz> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Standard half-open intersection test: the windows overlap unless
    /// one ends at or before the other starts.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }
}

// ── Working hours ────────────────────────────────────────────

/// Daily working hours as wall-clock hours `[start_hour, end_hour)`.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize)]
pub struct WorkingHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 17,
        }
    }
}

impl WorkingHours {
    pub fn validate(&self) -> Result<(), TimeError> {
        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            return Err(TimeError::BadWorkingHours {
                start: self.start_hour,
                end: self.end_hour,
            });
        }
        Ok(())
    }
}

// ── Timezone helpers ─────────────────────────────────────────

/// Resolve a wall-clock time on `date` in `tz`.
///
/// Hour 24 is accepted as the day's close and resolves to midnight at
/// the start of the following day, so `end_hour: 24` working hours
/// produce a valid day-close instant.  Ambiguous local times (DST fold)
/// resolve to the earlier instant; nonexistent local times (DST gap)
/// are an error.
pub fn local_at(date: NaiveDate, hour: u32, minute: u32, tz: Tz) -> Result<DateTime<Tz>, TimeError> {
    let (date, hour) = if hour == 24 && minute == 0 {
        let next = date
            .succ_opt()
            .ok_or_else(|| TimeError::BadTimestamp(format!("{date} has no following day")))?;
        (next, 0)
    } else {
        (date, hour)
    };
    let naive = date.and_time(
        NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or(TimeError::BadWorkingHours { start: hour, end: hour })?,
    );
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or(TimeError::NonexistentLocalTime(naive))
}

/// Parse an external timestamp into the business timezone.
///
/// Accepts RFC 3339 (any offset, normalised into `tz`) or a naive
/// `YYYY-MM-DDTHH:MM[:SS]` / `YYYY-MM-DD HH:MM` interpreted as a
/// wall-clock time in `tz`.
pub fn parse_instant(raw: &str, tz: Tz) -> Result<DateTime<Tz>, TimeError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&tz));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return tz
                .from_local_datetime(&naive)
                .earliest()
                .ok_or(TimeError::NonexistentLocalTime(naive));
        }
    }
    Err(TimeError::BadTimestamp(raw.to_string()))
}

/// Parse a calendar day (`YYYY-MM-DD`).
pub fn parse_date(raw: &str) -> Result<NaiveDate, TimeError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| TimeError::BadTimestamp(raw.to_string()))
}

/// Current instant in the business timezone.
pub fn now_in(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tz() -> Tz {
        DEFAULT_TIMEZONE.parse().unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        local_at(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(), h, m, tz()).unwrap()
    }

    #[test]
    fn rejects_inverted_window() {
        assert!(TimeWindow::new(at(10, 0), at(9, 0)).is_err());
        assert!(TimeWindow::new(at(10, 0), at(10, 0)).is_err());
    }

    #[test]
    fn half_open_overlap() {
        let a = TimeWindow::new(at(9, 0), at(10, 0)).unwrap();
        let b = TimeWindow::new(at(10, 0), at(11, 0)).unwrap();
        let c = TimeWindow::new(at(9, 30), at(10, 30)).unwrap();
        // Touching endpoints do not overlap.
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn parse_rfc3339_normalises_offset() {
        // 07:00 UTC == 09:00 SAST.
        let dt = parse_instant("2025-06-02T07:00:00Z", tz()).unwrap();
        assert_eq!(dt, at(9, 0));
    }

    #[test]
    fn parse_naive_uses_business_timezone() {
        let dt = parse_instant("2025-06-02T14:30", tz()).unwrap();
        assert_eq!(dt, at(14, 30));
    }

    #[test]
    fn parse_garbage_fails() {
        assert!(parse_instant("next tuesday-ish", tz()).is_err());
    }

    #[test]
    fn hour_24_resolves_to_next_day_midnight() {
        let close = local_at(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(), 24, 0, tz()).unwrap();
        let midnight = local_at(NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(), 0, 0, tz()).unwrap();
        assert_eq!(close, midnight);
    }

    #[test]
    fn working_hours_validation() {
        assert!(WorkingHours::default().validate().is_ok());
        assert!(WorkingHours {
            start_hour: 17,
            end_hour: 9
        }
        .validate()
        .is_err());
        assert!(WorkingHours {
            start_hour: 9,
            end_hour: 25
        }
        .validate()
        .is_err());
    }
}
