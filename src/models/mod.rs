//! Model provider abstraction.
//!
//! The agent drives any chat-completions backend through the
//! [`ModelProvider`] trait.  Tool use happens in text (the ReAct
//! protocol the parser understands), so a provider only has to turn a
//! message list into a completion string.

pub mod openai_compat;

use async_trait::async_trait;

pub use openai_compat::OpenAICompatProvider;

/// A single chat message with a role and content.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Serialise messages into the OpenAI-compatible JSON array format.
pub fn serialize_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
        .collect()
}

/// A chat-completions backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send the full message list and return the completion text.
    async fn send_chat(&self, messages: &[ChatMessage]) -> Result<String, anyhow::Error>;
}
