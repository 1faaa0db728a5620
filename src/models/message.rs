//! Conversation history entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a conversation entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The customer.
    Customer,
    /// The automated assistant.
    Assistant,
    /// A human agent.
    Agent,
    /// Status text generated by the handoff system.
    System,
}

impl MessageRole {
    /// Stable lowercase label used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Assistant => "assistant",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }

    /// Parse a stored label.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "customer" => Some(Self::Customer),
            "assistant" => Some(Self::Assistant),
            "agent" => Some(Self::Agent),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One entry in a session's ordered history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ChatMessage {
    /// Unique message identifier.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Author role.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
    /// Free-form annotations (agent id, transfer id, ...).
    pub metadata: Option<serde_json::Value>,
    /// Arrival timestamp.
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Construct a message stamped now.
    #[must_use]
    pub fn new(
        session_id: String,
        role: MessageRole,
        content: String,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            role,
            content,
            metadata,
            created_at: Utc::now(),
        }
    }
}
