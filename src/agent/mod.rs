//! Agent runtime: the think/act/observe turn loop.
//!
//! One call to [`AgentRuntime::run_turn`] handles a single customer
//! message: the model is prompted with the persona, the rendered tool
//! catalogue, recent history, and a scratchpad of this turn's tool
//! work, then its completion is parsed by [`parser`].  Parsed actions
//! are dispatched through [`crate::tools::dispatch`]; parse failures
//! are fed back to the model as corrective observations so it can
//! repair its own output.  The loop is bounded by `max_iterations`.

pub mod parser;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::convo::Exchange;
use crate::models::{ChatMessage, ModelProvider};
use crate::tools::{self, ToolCallRecord, ToolContext};
use parser::{ParseError, ParsedAction};

/// Reply used when the model terminates with an empty final answer or
/// never reaches one within the iteration budget.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I didn't quite catch that. Could you say it again in different words?";

const PERSONA: &str = "\
You are Grace, the front-desk assistant for a digital marketing agency. You help customers \
check availability, book, reschedule, or cancel onboarding calls, and you answer questions \
about the agency warmly and concisely. Before booking, collect the customer's full name, \
email address, company, what they want to achieve, and their approximate monthly budget. \
Always check availability before offering a slot. If the customer asks for a human or asks \
for something you cannot help with, use the human_handover tool.";

/// Result of one completed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Text to send back to the customer.
    pub response: String,
    /// Audit records of every tool call dispatched during the turn.
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Drives the think/act/observe loop against a [`ModelProvider`].
pub struct AgentRuntime {
    provider: Arc<dyn ModelProvider>,
    max_iterations: usize,
}

impl AgentRuntime {
    pub fn new(provider: Arc<dyn ModelProvider>, max_iterations: usize) -> Self {
        Self {
            provider,
            max_iterations: max_iterations.max(1),
        }
    }

    fn system_prompt() -> String {
        format!(
            "{PERSONA}\n\nYou have access to the following tools:\n{}\n\n\
             Use the following format:\n\
             Thought: reason about what to do next\n\
             Action: the tool to use, one of [{}]\n\
             Action Input: the tool arguments as a JSON object\n\
             Observation: the tool's result\n\
             ... (Thought/Action/Action Input/Observation can repeat)\n\
             Final Answer: your reply to the customer\n\n\
             When you can answer without a tool, go straight to Final Answer.",
            tools::render_catalog(),
            tools::tool_names(),
        )
    }

    /// Run one turn.  Tool failures and parse failures stay inside the
    /// loop as observations; only infrastructure failures (the provider
    /// itself erroring) surface as `Err`.
    pub async fn run_turn(
        &self,
        query: &str,
        history: &[Exchange],
        ctx: &ToolContext,
    ) -> anyhow::Result<TurnOutcome> {
        let mut messages = vec![ChatMessage::new("system", Self::system_prompt())];
        for exchange in history {
            messages.push(ChatMessage::new(&exchange.role, &exchange.content));
        }
        messages.push(ChatMessage::new("user", query));

        let mut records: Vec<ToolCallRecord> = Vec::new();

        for iteration in 0..self.max_iterations {
            let completion = self.provider.send_chat(&messages).await?;
            debug!(iteration, chars = completion.len(), "model completion received");

            match parser::parse(&completion) {
                Ok(ParsedAction::Finish { output }) => {
                    let response = if output.trim().is_empty() {
                        warn!("model produced an empty final answer");
                        FALLBACK_REPLY.to_string()
                    } else {
                        output
                    };
                    return Ok(TurnOutcome {
                        response,
                        tool_calls: records,
                    });
                }
                Ok(ParsedAction::Act { tool, input }) => {
                    let (observation, record) = tools::dispatch(&tool, input, ctx).await;
                    records.push(record);
                    messages.push(ChatMessage::new("assistant", &completion));
                    messages
                        .push(ChatMessage::new("user", format!("Observation: {observation}")));
                }
                Err(err) => {
                    // Feed the failure back; one corrective round-trip
                    // usually repairs the format.
                    warn!(error = %err, "model output failed to parse");
                    messages.push(ChatMessage::new("assistant", &completion));
                    messages.push(ChatMessage::new("user", corrective_prompt(&err)));
                }
            }
        }

        warn!(
            max_iterations = self.max_iterations,
            "turn exhausted its iteration budget without a final answer"
        );
        Ok(TurnOutcome {
            response: FALLBACK_REPLY.to_string(),
            tool_calls: records,
        })
    }
}

fn corrective_prompt(err: &ParseError) -> String {
    format!(
        "Your last reply could not be processed: {err}. Reply again using the required \
         format: either a Final Answer, or an Action line naming one tool followed by an \
         Action Input line with a JSON object."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted provider that pops canned completions in order.
    struct ScriptedProvider {
        script: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(lines: &[&str]) -> Self {
            Self {
                script: Mutex::new(lines.iter().rev().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn send_chat(&self, _messages: &[ChatMessage]) -> Result<String, anyhow::Error> {
            self.script
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn test_ctx() -> (tempfile::TempDir, ToolContext) {
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
            conversation_id: "test-conv".to_string(),
            min_monthly_budget: None,
        };
        (dir, ctx)
    }

    #[tokio::test]
    async fn direct_final_answer_short_circuits() {
        let (_dir, ctx) = test_ctx();
        let runtime = AgentRuntime::new(
            Arc::new(ScriptedProvider::new(&["Final Answer: Hello! How can I help?"])),
            5,
        );
        let outcome = runtime.run_turn("hi", &[], &ctx).await.unwrap();
        assert_eq!(outcome.response, "Hello! How can I help?");
        assert!(outcome.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn empty_final_answer_falls_back() {
        let (_dir, ctx) = test_ctx();
        let runtime =
            AgentRuntime::new(Arc::new(ScriptedProvider::new(&["Final Answer:   "])), 5);
        let outcome = runtime.run_turn("hi", &[], &ctx).await.unwrap();
        assert_eq!(outcome.response, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn garbled_output_gets_a_corrective_round_trip() {
        let (_dir, ctx) = test_ctx();
        let runtime = AgentRuntime::new(
            Arc::new(ScriptedProvider::new(&[
                "I think I should do something but forgot the format",
                "Final Answer: Recovered.",
            ])),
            5,
        );
        let outcome = runtime.run_turn("hi", &[], &ctx).await.unwrap();
        assert_eq!(outcome.response, "Recovered.");
    }

    #[tokio::test]
    async fn iteration_budget_exhaustion_falls_back() {
        let (_dir, ctx) = test_ctx();
        let runtime = AgentRuntime::new(
            Arc::new(ScriptedProvider::new(&["garbage", "garbage", "garbage"])),
            3,
        );
        let outcome = runtime.run_turn("hi", &[], &ctx).await.unwrap();
        assert_eq!(outcome.response, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_observation_and_records_failure() {
        crate::tools::init();
        let (_dir, ctx) = test_ctx();
        let runtime = AgentRuntime::new(
            Arc::new(ScriptedProvider::new(&[
                "Thought: let me try\nAction: teleport\nAction Input: {\"to\": \"mars\"}",
                "Final Answer: Sorry, I can't do that.",
            ])),
            5,
        );
        let outcome = runtime.run_turn("hi", &[], &ctx).await.unwrap();
        assert_eq!(outcome.response, "Sorry, I can't do that.");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(!outcome.tool_calls[0].success);
        assert_eq!(outcome.tool_calls[0].tool, "teleport");
    }
}
