//! Agent conversation log.
//!
//! Text messages accumulate as responses. Status and error messages are
//! single slots holding the latest one; a new text message clears both.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thinclient_core::MessageId;
use tokio::sync::watch;
use tracing::debug;

/// Agent message category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMessageKind {
    /// Spoken or written reply.
    Text,
    /// Progress indicator.
    Status,
    /// Failure report.
    Error,
}

/// One message from the agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    /// Category.
    #[serde(rename = "type")]
    pub kind: AgentMessageKind,
    /// Correlates streamed tokens with their message.
    pub message_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Speaker.
    pub role: String,
    /// Body text.
    #[serde(default)]
    pub message: String,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialAgentMessage {
    #[serde(rename = "type")]
    kind: AgentMessageKind,
    message_id: Option<String>,
    timestamp: Option<i64>,
    role: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl AgentMessage {
    /// Parse a message, filling missing id, timestamp and role.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let partial: PartialAgentMessage = serde_json::from_value(value)?;
        Ok(Self {
            kind: partial.kind,
            message_id: partial
                .message_id
                .unwrap_or_else(|| MessageId::generate().to_string()),
            timestamp: partial
                .timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            role: partial.role.unwrap_or_else(|| "Agent".to_owned()),
            message: partial.message,
            extra: partial.extra,
        })
    }
}

/// Snapshot of the conversation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationLog {
    /// Text messages, oldest first.
    pub responses: Vec<AgentMessage>,
    /// Latest status message since the last text.
    pub status: Option<AgentMessage>,
    /// Latest error message since the last text.
    pub error: Option<AgentMessage>,
}

/// Observable conversation state.
pub struct Conversation {
    log: watch::Sender<ConversationLog>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// Empty conversation.
    pub fn new() -> Self {
        Self {
            log: watch::Sender::new(ConversationLog::default()),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> ConversationLog {
        self.log.borrow().clone()
    }

    /// Watch for changes.
    pub fn subscribe(&self) -> watch::Receiver<ConversationLog> {
        self.log.subscribe()
    }

    /// Record one message.
    pub fn add(&self, message: AgentMessage) {
        self.log.send_modify(|log| match message.kind {
            AgentMessageKind::Text => {
                log.responses.push(message);
                log.status = None;
                log.error = None;
            }
            AgentMessageKind::Status => log.status = Some(message),
            AgentMessageKind::Error => log.error = Some(message),
        });
    }

    /// Replace the responses with the text messages of `messages`.
    pub fn set_context(&self, messages: Vec<AgentMessage>) {
        self.log.send_modify(|log| {
            log.responses = messages
                .into_iter()
                .filter(|m| m.kind == AgentMessageKind::Text)
                .collect();
            log.status = None;
            log.error = None;
        });
    }

    /// Append a streamed token to the response with `message_id`.
    pub fn add_token(&self, message_id: &str, token: &str) {
        let found = self.log.send_if_modified(|log| {
            match log.responses.iter_mut().find(|m| m.message_id == message_id) {
                Some(message) => {
                    message.message.push_str(token);
                    true
                }
                None => false,
            }
        });
        if !found {
            debug!(message_id, "token for unknown message");
        }
    }

    /// Forget everything.
    pub fn clear(&self) {
        let _ = self.log.send_replace(ConversationLog::default());
    }
}
