//! Tool registry + dispatcher.
//!
//! Every tool the agent can invoke is described by a [`ToolMeta`]
//! (name, description, JSON Schema for its arguments) registered in a
//! global registry, with an async handler attached separately.  Call
//! [`init()`] at startup to register the builtins.
//!
//! The dispatcher is the trust boundary between the model and the
//! side-effecting world: it normalises whatever argument shape the
//! model produced (object, JSON-encoded string, bare string), validates
//! it against the declared schema, executes the handler, and converts
//! every failure into a plain-text observation the agent can read and
//! self-correct from.  A tool failure never terminates the turn.  Each
//! dispatch also yields a [`ToolCallRecord`] with a generated call id
//! and the normalised arguments; the audit log is built from these,
//! never from the model's own self-reported call history.

pub mod builtins;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::parser::ActionInput;
use crate::booking::Bookings;
use crate::convo::ConversationStore;

/// Metadata describing a tool available to the agent.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolMeta {
    /// Machine name; must match the parser's identifier grammar.
    pub name: String,
    /// One-liner injected into the agent prompt.
    pub description: String,
    /// JSON Schema object describing the expected arguments.
    pub args_schema: Value,
}

/// Shared state handed to every tool handler.
#[derive(Clone)]
pub struct ToolContext {
    pub bookings: Arc<Bookings>,
    pub conversations: Arc<ConversationStore>,
    /// Conversation the current turn belongs to.
    pub conversation_id: String,
    /// Minimum monthly budget to qualify for a booking, if configured.
    pub min_monthly_budget: Option<i64>,
}

/// Async handler a tool registers for dispatch.
pub type ToolHandler = Arc<
    dyn Fn(Value, ToolContext) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>
        + Send
        + Sync,
>;

struct ToolEntry {
    meta: ToolMeta,
    handler: Option<ToolHandler>,
}

static REGISTRY: Lazy<Mutex<Vec<ToolEntry>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Register a tool's metadata (no handler).  Duplicate names are
/// ignored — first registration wins.
pub fn register_tool(meta: ToolMeta) {
    let mut reg = REGISTRY.lock().expect("tool registry poisoned");
    if reg.iter().any(|e| e.meta.name == meta.name) {
        return;
    }
    reg.push(ToolEntry { meta, handler: None });
}

/// Attach a handler to an already-registered tool by name.
pub fn register_handler(name: &str, handler: ToolHandler) {
    let mut reg = REGISTRY.lock().expect("tool registry poisoned");
    if let Some(entry) = reg.iter_mut().find(|e| e.meta.name == name) {
        entry.handler = Some(handler);
    }
}

/// Metadata for every registered tool.
pub fn list_tools() -> Vec<ToolMeta> {
    REGISTRY
        .lock()
        .expect("tool registry poisoned")
        .iter()
        .map(|e| e.meta.clone())
        .collect()
}

/// Render the tool catalogue for prompt injection.
pub fn render_catalog() -> String {
    list_tools()
        .iter()
        .map(|meta| {
            format!(
                "- {}: {} Arguments (JSON Schema): {}",
                meta.name,
                meta.description,
                serde_json::to_string(&meta.args_schema).unwrap_or_else(|_| "{}".into()),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Comma-separated tool names for the prompt.
pub fn tool_names() -> String {
    list_tools()
        .iter()
        .map(|m| m.name.clone())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Audit record of one dispatched tool call, with arguments already
/// normalised to a structured object.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRecord {
    /// Generated id; the model's own call bookkeeping is unreliable,
    /// so ids are always minted here.
    pub call_id: String,
    pub tool: String,
    pub args: Value,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Normalise a parsed action input into a structured argument object.
///
/// Precedence: structured object > JSON-encoded string (models
/// frequently double-encode) > bare string wrapped under the schema's
/// first required field (falling back to `query`).
pub fn normalize_args(input: ActionInput, schema: &Value) -> Result<Value, String> {
    match input {
        ActionInput::Json(Value::Object(map)) => Ok(Value::Object(map)),
        ActionInput::Json(Value::String(s)) => normalize_string_arg(&s, schema),
        ActionInput::Json(other) => {
            Err(format!("arguments must be a JSON object, got: {other}"))
        }
        ActionInput::Raw(s) => normalize_string_arg(&s, schema),
    }
}

fn normalize_string_arg(raw: &str, schema: &Value) -> Result<Value, String> {
    let trimmed = raw.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(Value::Object(map));
    }
    // Double-encoded: a JSON string containing a JSON object.
    if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(trimmed) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&inner) {
            return Ok(Value::Object(map));
        }
    }
    let mut map = serde_json::Map::new();
    map.insert(default_field(schema), Value::String(trimmed.to_string()));
    Ok(Value::Object(map))
}

/// Field a bare-string argument is wrapped under: the schema's first
/// required property, else `query`.
fn default_field(schema: &Value) -> String {
    schema["required"]
        .as_array()
        .and_then(|req| req.first())
        .and_then(|v| v.as_str())
        .unwrap_or("query")
        .to_string()
}

/// Check `args` against the declared schema: required fields present,
/// primitive types matching.  Returns human-readable violations.
pub fn validate_args(args: &Value, schema: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    let Some(obj) = args.as_object() else {
        return vec!["arguments are not an object".to_string()];
    };

    if let Some(required) = schema["required"].as_array() {
        for field in required.iter().filter_map(|v| v.as_str()) {
            if !obj.contains_key(field) {
                violations.push(format!("missing required field '{field}'"));
            }
        }
    }

    if let Some(props) = schema["properties"].as_object() {
        for (field, spec) in props {
            let Some(value) = obj.get(field) else { continue };
            let Some(expected) = spec["type"].as_str() else { continue };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                _ => true,
            };
            if !ok {
                violations.push(format!(
                    "field '{field}' should be a {expected}, got: {value}"
                ));
            }
        }
    }

    violations
}

/// Execute a parsed tool action.  Always returns an observation string
/// (never an error) plus the audit record of the call.
pub async fn dispatch(
    name: &str,
    input: ActionInput,
    ctx: &ToolContext,
) -> (String, ToolCallRecord) {
    let start = std::time::Instant::now();
    let mut record = ToolCallRecord {
        call_id: Uuid::new_v4().to_string(),
        tool: name.to_string(),
        args: Value::Null,
        success: false,
        duration_ms: 0,
        error: None,
    };

    let entry = {
        let reg = REGISTRY.lock().expect("tool registry poisoned");
        reg.iter()
            .find(|e| e.meta.name == name)
            .map(|e| (e.meta.clone(), e.handler.clone()))
    };
    let Some((meta, handler)) = entry else {
        record.error = Some("unknown tool".to_string());
        record.duration_ms = start.elapsed().as_millis() as u64;
        let observation = format!("Unknown tool '{name}'. Available tools: {}.", tool_names());
        return (observation, record);
    };

    let args = match normalize_args(input, &meta.args_schema) {
        Ok(args) => args,
        Err(violation) => {
            record.error = Some(violation.clone());
            record.duration_ms = start.elapsed().as_millis() as u64;
            return (
                format!(
                    "Invalid arguments for '{name}': {violation}. Please correct them and try again."
                ),
                record,
            );
        }
    };
    record.args = args.clone();

    let violations = validate_args(&args, &meta.args_schema);
    if !violations.is_empty() {
        let detail = violations.join("; ");
        record.error = Some(detail.clone());
        record.duration_ms = start.elapsed().as_millis() as u64;
        return (
            format!("Invalid arguments for '{name}': {detail}. Please correct them and try again."),
            record,
        );
    }

    let Some(handler) = handler else {
        record.error = Some("no handler".to_string());
        record.duration_ms = start.elapsed().as_millis() as u64;
        warn!(tool = name, "tool registered without a handler");
        return (
            format!("The tool '{name}' is unavailable right now."),
            record,
        );
    };

    debug!(tool = name, call_id = %record.call_id, "dispatching tool");
    // Run the handler on its own task so a panic is contained to the
    // call and surfaces as an observation like any other failure.
    let result = match tokio::spawn(handler(args, ctx.clone())).await {
        Ok(result) => result,
        Err(join_err) => Err(anyhow::anyhow!("tool handler panicked: {join_err}")),
    };
    record.duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(observation) => {
            record.success = true;
            (observation, record)
        }
        Err(e) => {
            // Tool failures become observations, not turn aborts.
            warn!(tool = name, error = %e, "tool execution failed");
            record.error = Some(e.to_string());
            (
                "Sorry, something went wrong while handling that request. Please try again."
                    .to_string(),
                record,
            )
        }
    }
}

/// Register all builtin tool metadata and handlers.
pub fn init() {
    builtins::availability::register();
    builtins::book::register();
    builtins::cancel::register();
    builtins::reschedule::register();
    builtins::handover::register();
}
