//! Chat turns through the HTTP gateway: persistence, tool use, and the
//! handover short-circuit.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use tempfile::TempDir;

use frontdesk::agent::AgentRuntime;
use frontdesk::booking::store::BookingStore;
use frontdesk::booking::Bookings;
use frontdesk::calendar::LocalCalendar;
use frontdesk::convo::gate::ConversationGate;
use frontdesk::convo::{ConversationStore, ConvoStatus, HANDOVER_MESSAGE};
use frontdesk::gateway::{start_gateway, GatewayDeps};
use frontdesk::models::{ChatMessage, ModelProvider};
use frontdesk::notify::NullNotifier;
use frontdesk::schedule::slots::SlotParams;
use frontdesk::schedule::DEFAULT_TIMEZONE;
use frontdesk::tools;

/// Provider that counts calls and replies from a fixed script, looping
/// on the last entry.
struct CountingProvider {
    calls: Arc<AtomicUsize>,
    script: Vec<String>,
}

#[async_trait]
impl ModelProvider for CountingProvider {
    async fn send_chat(&self, _messages: &[ChatMessage]) -> Result<String, anyhow::Error> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let line = self
            .script
            .get(n)
            .or_else(|| self.script.last())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("empty script"))?;
        Ok(line)
    }
}

struct TestServer {
    addr: SocketAddr,
    conversations: Arc<ConversationStore>,
    calls: Arc<AtomicUsize>,
    _dir: TempDir,
}

async fn serve(script: &[&str]) -> TestServer {
    tools::init();
    let dir = TempDir::new().unwrap();
    let tz: Tz = DEFAULT_TIMEZONE.parse().unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let provider = CountingProvider {
        calls: calls.clone(),
        script: script.iter().map(|s| s.to_string()).collect(),
    };

    let bookings = Arc::new(Bookings::new(
        Arc::new(LocalCalendar::new()),
        BookingStore::open(dir.path(), tz).unwrap(),
        Arc::new(NullNotifier),
        tz,
        SlotParams::default(),
        false,
    ));
    let conversations = Arc::new(ConversationStore::new(dir.path()));

    let gateway = start_gateway(
        "127.0.0.1:0".parse().unwrap(),
        GatewayDeps {
            runtime: Arc::new(AgentRuntime::new(Arc::new(provider), 5)),
            bookings,
            conversations: conversations.clone(),
            gate: Arc::new(ConversationGate::new(8, Duration::from_secs(10))),
            history_limit: 40,
            min_monthly_budget: None,
        },
    )
    .await
    .unwrap();

    TestServer {
        addr: gateway.addr,
        conversations,
        calls,
        _dir: dir,
    }
}

async fn post_chat(addr: SocketAddr, conversation_id: &str, query: &str) -> (u16, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/api/chat"))
        .json(&serde_json::json!({
            "conversation_id": conversation_id,
            "query": query,
        }))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body: serde_json::Value = resp.json().await.unwrap();
    let text = body["response"].as_str().unwrap_or_default().to_string();
    (status, text)
}

#[tokio::test]
async fn chat_turn_persists_transcript() {
    let server = serve(&["Final Answer: Hello! How can I help you today?"]).await;

    let (status, response) = post_chat(server.addr, "conv-basic", "hi there").await;
    assert_eq!(status, 200);
    assert_eq!(response, "Hello! How can I help you today?");

    let history = server
        .conversations
        .load_history("conv-basic", 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, "user");
    assert_eq!(history[0].content, "hi there");
    assert_eq!(history[1].role, "assistant");
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let server = serve(&["Final Answer: unreachable"]).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/api/chat", server.addr))
        .json(&serde_json::json!({"conversation_id": "conv-x", "query": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(server.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handover_short_circuits_before_the_model() {
    let server = serve(&["Final Answer: should never be needed"]).await;
    server
        .conversations
        .set_status("conv-handed", ConvoStatus::Handover)
        .unwrap();

    let (status, response) = post_chat(server.addr, "conv-handed", "are you there?").await;
    assert_eq!(status, 200);
    assert_eq!(response, HANDOVER_MESSAGE);
    // The model was never consulted.
    assert_eq!(server.calls.load(Ordering::SeqCst), 0);

    // The exchange is still recorded.
    let history = server
        .conversations
        .load_history("conv-handed", 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, HANDOVER_MESSAGE);
}

#[tokio::test]
async fn handover_tool_flags_the_conversation() {
    let server = serve(&[
        "Thought: they want a person\n\
         Action: human_handover\n\
         Action Input: {\"reason\": \"customer asked for a human\"}",
        "Final Answer: Connecting you with a colleague now.",
    ])
    .await;

    let (status, _response) = post_chat(server.addr, "conv-tool", "can I talk to a human?").await;
    assert_eq!(status, 200);
    assert_eq!(server.conversations.status("conv-tool"), ConvoStatus::Handover);

    // Every later turn gets the fixed message without another model call.
    let calls_before = server.calls.load(Ordering::SeqCst);
    let (_, response) = post_chat(server.addr, "conv-tool", "hello?").await;
    assert_eq!(response, HANDOVER_MESSAGE);
    assert_eq!(server.calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn tool_calls_are_recorded_on_the_assistant_exchange() {
    let server = serve(&[
        "Thought: check the calendar\n\
         Action: check_availability\n\
         Action Input: {\"date\": \"2031-03-10\"}",
        "Final Answer: We have plenty of slots on that day.",
    ])
    .await;

    let (status, _response) =
        post_chat(server.addr, "conv-avail", "what's free on 10 March 2031?").await;
    assert_eq!(status, 200);

    let history = server
        .conversations
        .load_history("conv-avail", 10)
        .await
        .unwrap();
    let reply = &history[1];
    let calls = reply.tool_calls.as_ref().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool, "check_availability");
    assert!(calls[0].success);
    assert_eq!(calls[0].args["date"], "2031-03-10");
    assert!(!calls[0].call_id.is_empty());
}

#[tokio::test]
async fn status_endpoint_reports_ok() {
    let server = serve(&["Final Answer: unused"]).await;
    let resp = reqwest::get(format!("http://{}/api/status", server.addr))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}
