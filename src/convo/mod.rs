//! Conversation persistence: JSONL transcripts plus a status sidecar.
//!
//! Each conversation is a single `conversations/<id>.jsonl` file of
//! [`Exchange`] lines; an adjacent `<id>.status` file tracks whether
//! the conversation is still handled by the agent or has been handed
//! over to a human.  A missing sidecar means `active`.

pub mod gate;

use std::path::PathBuf;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::tools::ToolCallRecord;

/// Fixed reply for every turn in a handed-over conversation.
pub const HANDOVER_MESSAGE: &str =
    "Thanks for reaching out! One of our team members has picked up this conversation and \
     will get back to you shortly.";

/// A single conversational exchange, serialised as one JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    /// Unix-epoch timestamp in milliseconds.
    pub timestamp: u64,
    /// Message role: `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
    /// Tool calls executed while producing this message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
}

impl Exchange {
    pub fn now(role: &str, content: impl Into<String>) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            timestamp,
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }
}

/// Whether the agent still owns a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvoStatus {
    Active,
    Handover,
}

impl ConvoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConvoStatus::Active => "active",
            ConvoStatus::Handover => "handover",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "active" => Some(ConvoStatus::Active),
            "handover" => Some(ConvoStatus::Handover),
            _ => None,
        }
    }
}

/// JSONL-backed conversation store rooted at `<home>/conversations/`.
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            dir: home.into().join("conversations"),
        }
    }

    /// Conversation ids come straight from the API; constrain them to a
    /// filename-safe alphabet so they can never escape the store dir.
    fn validate_id(id: &str) -> anyhow::Result<()> {
        let ok = !id.is_empty()
            && id.len() <= 128
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if ok {
            Ok(())
        } else {
            anyhow::bail!("invalid conversation id: {id:?}");
        }
    }

    fn transcript_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.jsonl"))
    }

    fn status_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.status"))
    }

    /// Append one exchange to the transcript, creating it if needed.
    pub async fn append(&self, id: &str, exchange: &Exchange) -> anyhow::Result<()> {
        Self::validate_id(id)?;
        fs::create_dir_all(&self.dir)
            .await
            .context("create conversations dir")?;

        let path = self.transcript_path(id);
        let line = serde_json::to_string(exchange).context("serialize Exchange")?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("open transcript {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;

        debug!(conversation = id, role = %exchange.role, "exchange appended");
        Ok(())
    }

    /// Load up to `limit` most-recent exchanges.  Missing transcript is
    /// an empty history; malformed lines are skipped, not fatal.
    pub async fn load_history(&self, id: &str, limit: usize) -> anyhow::Result<Vec<Exchange>> {
        Self::validate_id(id)?;
        let path = self.transcript_path(id);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };

        let mut exchanges: Vec<Exchange> = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Exchange>(line) {
                Ok(ex) => exchanges.push(ex),
                Err(e) => debug!(error = %e, "skipping malformed JSONL line"),
            }
        }

        if exchanges.len() > limit {
            exchanges = exchanges.split_off(exchanges.len() - limit);
        }
        Ok(exchanges)
    }

    /// Current status; a missing or unreadable sidecar means `Active`.
    pub fn status(&self, id: &str) -> ConvoStatus {
        if Self::validate_id(id).is_err() {
            return ConvoStatus::Active;
        }
        std::fs::read_to_string(self.status_path(id))
            .ok()
            .and_then(|raw| ConvoStatus::parse(&raw))
            .unwrap_or(ConvoStatus::Active)
    }

    pub fn set_status(&self, id: &str, status: ConvoStatus) -> anyhow::Result<()> {
        Self::validate_id(id)?;
        std::fs::create_dir_all(&self.dir).context("create conversations dir")?;
        std::fs::write(self.status_path(id), status.as_str())
            .with_context(|| format!("write status for conversation {id}"))?;
        Ok(())
    }
}
