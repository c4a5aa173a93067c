//! `book_appointment` tool — qualify the lead and place a booking.

use std::sync::Arc;

use serde_json::Value;

use crate::booking::{BookRequest, BookingError};
use crate::schedule::parse_instant;
use crate::tools::{register_handler, register_tool, ToolContext, ToolMeta};

fn required_str<'a>(args: &'a Value, field: &str) -> anyhow::Result<&'a str> {
    args[field]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("book_appointment requires a '{field}' string"))
}

/// `book_appointment { full_name, email, company, start_time, goal,
/// monthly_budget? }` — place a pending booking after qualification.
pub async fn book_appointment(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let full_name = required_str(&args, "full_name")?;
    let email = required_str(&args, "email")?;
    let company = required_str(&args, "company")?;
    let raw_start = required_str(&args, "start_time")?;
    let goal = required_str(&args, "goal")?;

    if let Some(min) = ctx.min_monthly_budget {
        match args["monthly_budget"].as_i64() {
            None => {
                return Ok(
                    "Before booking, please ask the customer for their approximate monthly budget."
                        .to_string(),
                )
            }
            Some(budget) if budget < min => {
                return Ok(format!(
                    "The stated monthly budget ({budget}) is below our minimum engagement size. \
                     Politely explain that we are not a good fit at this time, and thank them \
                     for their interest."
                ))
            }
            Some(_) => {}
        }
    }

    let tz = ctx.bookings.timezone();
    let start = match parse_instant(raw_start, tz) {
        Ok(s) => s,
        Err(_) => {
            return Ok(format!(
                "I couldn't read '{raw_start}' as a date and time. Please provide it as \
                 YYYY-MM-DDTHH:MM."
            ))
        }
    };

    let req = BookRequest {
        full_name: full_name.to_string(),
        email: email.to_string(),
        company: company.to_string(),
        start,
        goal: goal.to_string(),
    };

    match ctx.bookings.book(&req).await {
        Ok(record) => Ok(format!(
            "Appointment booked for {} on {}. A confirmation link has been sent to {}; the \
             booking stays pending until they confirm.",
            full_name,
            start.format("%A %-d %B %Y at %H:%M"),
            record.identity.email()
        )),
        Err(BookingError::Policy(violation)) => Ok(format!(
            "That time can't be booked: {violation}. Please offer the customer a different day."
        )),
        Err(BookingError::SlotUnavailable) => Ok(
            "That slot was just taken. Please check availability again and offer another time."
                .to_string(),
        ),
        Err(other) => Err(other.into()),
    }
}

pub fn register() {
    register_tool(ToolMeta {
        name: "book_appointment".into(),
        description:
            "Book an onboarding call once the customer has shared their details and picked a slot."
                .into(),
        args_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "full_name": {
                    "type": "string",
                    "description": "Customer's full name"
                },
                "email": {
                    "type": "string",
                    "description": "Customer's email address"
                },
                "company": {
                    "type": "string",
                    "description": "Company the customer represents"
                },
                "start_time": {
                    "type": "string",
                    "description": "Chosen slot start, formatted YYYY-MM-DDTHH:MM in business local time"
                },
                "goal": {
                    "type": "string",
                    "description": "What the customer wants to achieve"
                },
                "monthly_budget": {
                    "type": "integer",
                    "description": "Customer's approximate monthly budget"
                }
            },
            "required": ["full_name", "email", "company", "start_time", "goal"]
        }),
    });
    register_handler(
        "book_appointment",
        Arc::new(|args, ctx| Box::pin(book_appointment(args, ctx))),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(min_monthly_budget: Option<i64>) -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::TempDir::new().unwrap();
        let tz: chrono_tz::Tz = crate::schedule::DEFAULT_TIMEZONE.parse().unwrap();
        let bookings = crate::booking::Bookings::new(
            Arc::new(crate::calendar::LocalCalendar::new()),
            crate::booking::store::BookingStore::open(dir.path(), tz).unwrap(),
            Arc::new(crate::notify::NullNotifier),
            tz,
            crate::schedule::slots::SlotParams::default(),
            false,
        );
        let ctx = ToolContext {
            bookings: Arc::new(bookings),
            conversations: Arc::new(crate::convo::ConversationStore::new(dir.path())),
            conversation_id: "conv-book".to_string(),
            min_monthly_budget,
        };
        (dir, ctx)
    }

    fn args(budget: Option<i64>) -> Value {
        let mut args = json!({
            "full_name": "Thandi Nkosi",
            "email": "thandi@example.com",
            "company": "Acme Retail",
            "start_time": "2031-03-10T10:00",
            "goal": "grow online sales",
        });
        if let Some(b) = budget {
            args["monthly_budget"] = json!(b);
        }
        args
    }

    #[tokio::test]
    async fn missing_budget_asks_for_it() {
        let (_dir, ctx) = ctx(Some(5000));
        let obs = book_appointment(args(None), ctx).await.unwrap();
        assert!(obs.contains("monthly budget"));
    }

    #[tokio::test]
    async fn low_budget_is_declined_without_booking() {
        let (_dir, ctx) = ctx(Some(5000));
        let bookings = ctx.bookings.clone();
        let obs = book_appointment(args(Some(500)), ctx).await.unwrap();
        assert!(obs.contains("not a good fit"));
        let date = chrono::NaiveDate::from_ymd_opt(2031, 3, 10).unwrap();
        // No slot was consumed.
        assert_eq!(bookings.free_slots_on(date).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn qualified_budget_books() {
        let (_dir, ctx) = ctx(Some(5000));
        let obs = book_appointment(args(Some(9000)), ctx).await.unwrap();
        assert!(obs.contains("Appointment booked"));
    }

    #[tokio::test]
    async fn no_configured_minimum_skips_qualification() {
        let (_dir, ctx) = ctx(None);
        let obs = book_appointment(args(None), ctx).await.unwrap();
        assert!(obs.contains("Appointment booked"));
    }
}
