//! `reschedule_appointment` tool — move a booking to a new slot.

use std::sync::Arc;

use serde_json::Value;

use crate::booking::{BookingError, IdentityKey};
use crate::schedule::parse_instant;
use crate::tools::{register_handler, register_tool, ToolContext, ToolMeta};

/// `reschedule_appointment { email, start_time, new_start_time }`.
pub async fn reschedule_appointment(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let email = args["email"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("reschedule_appointment requires an 'email' string"))?;
    let raw_start = args["start_time"].as_str().ok_or_else(|| {
        anyhow::anyhow!("reschedule_appointment requires a 'start_time' string")
    })?;
    let raw_new_start = args["new_start_time"].as_str().ok_or_else(|| {
        anyhow::anyhow!("reschedule_appointment requires a 'new_start_time' string")
    })?;

    let tz = ctx.bookings.timezone();
    let (start, new_start) = match (parse_instant(raw_start, tz), parse_instant(raw_new_start, tz))
    {
        (Ok(a), Ok(b)) => (a, b),
        _ => {
            return Ok(
                "I couldn't read one of the times. Please provide both the booked slot and the \
                 new slot as YYYY-MM-DDTHH:MM."
                    .to_string(),
            )
        }
    };

    let key = IdentityKey::new(email, start);
    match ctx.bookings.reschedule(&key, new_start).await {
        Ok(record) => Ok(format!(
            "The appointment for {} has been moved to {}.",
            record.identity.email(),
            new_start.format("%A %-d %B %Y at %H:%M")
        )),
        Err(BookingError::NotFound) => Ok(format!(
            "Sorry, I couldn't find an appointment for {} at that time. Please double-check \
             the email address and the booked slot.",
            key.email()
        )),
        Err(BookingError::Policy(violation)) => Ok(format!(
            "That new time can't be booked: {violation}. Please offer a different day."
        )),
        Err(other) => Err(other.into()),
    }
}

pub fn register() {
    register_tool(ToolMeta {
        name: "reschedule_appointment".into(),
        description:
            "Move an existing appointment to a new slot, identified by the customer's email and the currently booked start time."
                .into(),
        args_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "email": {
                    "type": "string",
                    "description": "Email the appointment was booked under"
                },
                "start_time": {
                    "type": "string",
                    "description": "Currently booked slot start, formatted YYYY-MM-DDTHH:MM"
                },
                "new_start_time": {
                    "type": "string",
                    "description": "New slot start, formatted YYYY-MM-DDTHH:MM"
                }
            },
            "required": ["email", "start_time", "new_start_time"]
        }),
    });
    register_handler(
        "reschedule_appointment",
        Arc::new(|args, ctx| Box::pin(reschedule_appointment(args, ctx))),
    );
}
