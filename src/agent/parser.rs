//! ReAct output parsing: turn raw model text into a validated action.
//!
//! The model is asked to emit either
//!
//! ```text
//! Action: <tool_name>
//! Action Input: {"key": "value"}
//! ```
//!
//! or `Final Answer: <reply>`, but real output is messy: trailing
//! prose after the JSON block, mangled braces, repeated blocks, or a
//! late change of mind into a final answer.  Parsing is deliberately
//! forgiving about surroundings and strict about the payload itself —
//! a malformed JSON body is a recoverable [`ParseError`] that the
//! agent loop feeds back to the model as a corrective prompt.

use thiserror::Error;

const FINISH_MARKER: &str = "Final Answer:";
const ACTION_MARKER: &str = "Action:";
const INPUT_MARKER: &str = "Action Input:";

/// The argument payload attached to an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionInput {
    /// A decoded JSON object.
    Json(serde_json::Value),
    /// No `{...}` span was present; the raw trimmed remainder.  The
    /// dispatcher decides how to wrap this for the target tool.
    Raw(String),
}

/// A single parsed step of model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAction {
    /// The model is done; `output` is everything after the finish
    /// marker, trimmed.
    Finish { output: String },
    /// Invoke a tool.
    Act { tool: String, input: ActionInput },
}

/// Recoverable parse failures.  The raw payload rides along so the
/// corrective re-prompt can show the model what it produced.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no action or final answer found in model output")]
    NoAction,
    #[error("tool name must be a bare identifier, got {0:?}")]
    BadToolName(String),
    #[error("action input is not valid JSON ({source}); payload: {payload}")]
    BadJson {
        payload: String,
        source: serde_json::Error,
    },
}

/// Parse one block of raw model output.
///
/// A finish marker anywhere in the text takes absolute precedence over
/// action markers — the model changed its mind, and the latest final
/// answer wins.  For actions, only the first `Action:` /
/// `Action Input:` pair is honored; repeated trailing blocks are
/// hallucinated continuations and are ignored.
pub fn parse(text: &str) -> Result<ParsedAction, ParseError> {
    if let Some(idx) = text.rfind(FINISH_MARKER) {
        return Ok(ParsedAction::Finish {
            output: text[idx + FINISH_MARKER.len()..].trim().to_string(),
        });
    }

    let action_at = text.find(ACTION_MARKER).ok_or(ParseError::NoAction)?;
    let after_action = &text[action_at + ACTION_MARKER.len()..];

    // Tool name: rest of the line after `Action:`, which must be a bare
    // identifier.  "book the call" is malformed output, not a tool
    // named that string.
    let name_line = after_action.lines().next().unwrap_or("").trim();
    if name_line.is_empty() {
        return Err(ParseError::NoAction);
    }
    if !name_line
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ParseError::BadToolName(name_line.to_string()));
    }
    let tool = name_line.to_string();

    let input_at = after_action.find(INPUT_MARKER).ok_or(ParseError::NoAction)?;
    let mut payload = &after_action[input_at + INPUT_MARKER.len()..];

    // Ignore any repeated Action block after the first pair.
    if let Some(next_action) = payload.find(ACTION_MARKER) {
        payload = &payload[..next_action];
    }

    let input = match (payload.find('{'), payload.rfind('}')) {
        (Some(open), Some(close)) if open < close => {
            let span = &payload[open..=close];
            match serde_json::from_str::<serde_json::Value>(span) {
                Ok(value) => ActionInput::Json(value),
                Err(source) => {
                    return Err(ParseError::BadJson {
                        payload: span.to_string(),
                        source,
                    })
                }
            }
        }
        // Tolerate fully brace-less input: the whole remainder becomes
        // a single string argument for the dispatcher to wrap.
        (None, _) => ActionInput::Raw(payload.trim().to_string()),
        // An unmatched brace is malformed JSON, not a string payload.
        (Some(open), _) => {
            let span = payload[open..].trim_end();
            match serde_json::from_str::<serde_json::Value>(span) {
                Ok(value) => ActionInput::Json(value),
                Err(source) => {
                    return Err(ParseError::BadJson {
                        payload: span.to_string(),
                        source,
                    })
                }
            }
        }
    };

    Ok(ParsedAction::Act { tool, input })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn final_answer_wins_over_preceding_action() {
        let text = "Thought: hmm\nAction: book_call\nAction Input: {\"a\":1}\n\
                    Final Answer: All booked for Tuesday!";
        let parsed = parse(text).unwrap();
        assert_eq!(
            parsed,
            ParsedAction::Finish {
                output: "All booked for Tuesday!".to_string()
            }
        );
    }

    #[test]
    fn action_with_trailing_prose() {
        let text = "Action: bookCall\nAction Input: {\"a\": 1}\nI will now wait for the result.";
        let parsed = parse(text).unwrap();
        match parsed {
            ParsedAction::Act { tool, input } => {
                assert_eq!(tool, "bookCall");
                assert_eq!(input, ActionInput::Json(json!({"a": 1})));
            }
            other => panic!("expected Act, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_parse_error() {
        // Unbalanced braces.
        let text = "Action: cancel_appointment\nAction Input: {\"email\": \"a@b.c\"";
        assert!(matches!(parse(text), Err(ParseError::BadJson { .. })));

        // Present-but-broken JSON span.
        let text = "Action: cancel_appointment\nAction Input: {\"email\": }";
        match parse(text) {
            Err(ParseError::BadJson { payload, .. }) => {
                assert!(payload.contains("email"));
            }
            other => panic!("expected BadJson, got {other:?}"),
        }
    }

    #[test]
    fn tool_name_must_be_identifier() {
        let text = "Action: book the call\nAction Input: {}";
        assert!(matches!(parse(text), Err(ParseError::BadToolName(_))));
    }

    #[test]
    fn first_action_pair_wins() {
        let text = "Action: check_availability\nAction Input: {\"date\": \"2025-06-02\"}\n\
                    Action: book_call\nAction Input: {\"email\": \"x@y.z\"}";
        match parse(text).unwrap() {
            ParsedAction::Act { tool, input } => {
                assert_eq!(tool, "check_availability");
                assert_eq!(input, ActionInput::Json(json!({"date": "2025-06-02"})));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn braceless_input_becomes_raw_string() {
        let text = "Action: check_availability\nAction Input: 2025-06-02";
        match parse(text).unwrap() {
            ParsedAction::Act { tool, input } => {
                assert_eq!(tool, "check_availability");
                assert_eq!(input, ActionInput::Raw("2025-06-02".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn plain_text_is_no_action() {
        assert!(matches!(
            parse("I would love to help you with that."),
            Err(ParseError::NoAction)
        ));
    }
}
