//! `human_handover` tool — escalate the conversation to a person.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::convo::{ConvoStatus, HANDOVER_MESSAGE};
use crate::tools::{register_handler, register_tool, ToolContext, ToolMeta};

/// `human_handover { reason? }` — flag the conversation for a human.
/// Once flagged, every later turn is answered with the fixed handover
/// message before any model work happens.
pub async fn human_handover(args: Value, ctx: ToolContext) -> anyhow::Result<String> {
    let reason = args["reason"].as_str().unwrap_or("not given");
    ctx.conversations
        .set_status(&ctx.conversation_id, ConvoStatus::Handover)?;
    info!(
        conversation = %ctx.conversation_id,
        reason,
        "conversation handed over to a human"
    );
    Ok(format!(
        "The conversation has been flagged for a human colleague. Reply to the customer with \
         exactly: \"{HANDOVER_MESSAGE}\""
    ))
}

pub fn register() {
    register_tool(ToolMeta {
        name: "human_handover".into(),
        description:
            "Hand the conversation over to a human colleague when the customer asks for one or the request is out of scope."
                .into(),
        args_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Short note on why the handover is needed"
                }
            }
        }),
    });
    register_handler(
        "human_handover",
        Arc::new(|args, ctx| Box::pin(human_handover(args, ctx))),
    );
}
