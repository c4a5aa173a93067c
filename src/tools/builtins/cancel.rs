//! `cancel_appointment` tool — cancel by email + booked start time.

use std::sync::Arc;

use serde_json::Value;

use crate::booking::{BookingError, IdentityKey};
use crate::schedule::parse_instant;
use crate::tools::{register_handler, register_tool, ToolContext, ToolMeta};

/// `cancel_appointment { email, start_time }`.
pub async fn cancel_appointment(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let email = args["email"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("cancel_appointment requires an 'email' string"))?;
    let raw_start = args["start_time"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("cancel_appointment requires a 'start_time' string"))?;

    let tz = ctx.bookings.timezone();
    let start = match parse_instant(raw_start, tz) {
        Ok(s) => s,
        Err(_) => {
            return Ok(format!(
                "I couldn't read '{raw_start}' as a date and time. Please provide the booked \
                 slot as YYYY-MM-DDTHH:MM."
            ))
        }
    };

    let key = IdentityKey::new(email, start);
    match ctx.bookings.cancel(&key).await {
        Ok(()) => Ok(format!(
            "The appointment for {} on {} has been canceled.",
            key.email(),
            start.format("%A %-d %B %Y at %H:%M")
        )),
        Err(BookingError::NotFound) => Ok(format!(
            "Sorry, I couldn't find an appointment for {} at that time. Please double-check \
             the email address and the booked slot.",
            key.email()
        )),
        Err(other) => Err(other.into()),
    }
}

pub fn register() {
    register_tool(ToolMeta {
        name: "cancel_appointment".into(),
        description: "Cancel an existing appointment using the customer's email and the booked start time."
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
                    "description": "Booked slot start, formatted YYYY-MM-DDTHH:MM"
                }
            },
            "required": ["email", "start_time"]
        }),
    });
    register_handler(
        "cancel_appointment",
        Arc::new(|args, ctx| Box::pin(cancel_appointment(args, ctx))),
    );
}
