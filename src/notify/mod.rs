//! Confirmation notifications.
//!
//! Booking creates a `pending_confirmation` row and hands the record to
//! a [`Notifier`]; the attendee finalises via `GET /confirm/<id>`.
//! Email delivery and templating live outside this repository, so the
//! default implementation logs the confirmation link where an operator
//! (or a downstream mailer tailing the logs) can pick it up.

use async_trait::async_trait;
use tracing::info;

use crate::booking::BookingRecord;

/// Receives booking lifecycle notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A booking was created and awaits confirmation.
    async fn booking_pending(&self, record: &BookingRecord);
}

/// Default notifier: logs the confirmation link.
pub struct LogNotifier {
    public_base_url: String,
}

impl LogNotifier {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn confirm_url(&self, booking_id: &str) -> String {
        format!("{}/confirm/{booking_id}", self.public_base_url)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn booking_pending(&self, record: &BookingRecord) {
        info!(
            booking = %record.id,
            email = %record.identity.email(),
            start = %record.identity.start_canonical(),
            url = %self.confirm_url(&record.id),
            "confirmation link issued"
        );
    }
}

/// Notifier that drops everything (tests).
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn booking_pending(&self, _record: &BookingRecord) {}
}
