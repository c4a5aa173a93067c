//! `check_availability` tool — list open slots on a given date.

use std::sync::Arc;

use serde_json::Value;

use crate::schedule::parse_date;
use crate::tools::{register_handler, register_tool, ToolContext, ToolMeta};

/// `check_availability { date }` — free slot starts for one business day.
pub async fn check_availability(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let raw_date = args["date"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("check_availability requires a 'date' string"))?;

    let date = match parse_date(raw_date) {
        Ok(d) => d,
        Err(_) => {
            return Ok(format!(
                "I couldn't read '{raw_date}' as a date. Please provide it as YYYY-MM-DD."
            ))
        }
    };

    let slots = ctx.bookings.free_slots_on(date).await?;
    if slots.is_empty() {
        return Ok(format!(
            "There are no open slots on {}. Please ask for another day.",
            date.format("%A %-d %B %Y")
        ));
    }

    let times = slots
        .iter()
        .map(|s| s.format("%H:%M").to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "Open slots on {}: {}. All times are local to the business.",
        date.format("%A %-d %B %Y"),
        times
    ))
}

pub fn register() {
    register_tool(ToolMeta {
        name: "check_availability".into(),
        description: "Look up which appointment slots are still open on a given date.".into(),
        args_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "date": {
                    "type": "string",
                    "description": "The day to check, formatted YYYY-MM-DD"
                }
            },
            "required": ["date"]
        }),
    });
    register_handler(
        "check_availability",
        Arc::new(|args, ctx| Box::pin(check_availability(args, ctx))),
    );
}
