//! Chat session model and stage transition table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::ChatMessage;

/// Coarse lifecycle phase of a support conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    /// Assistant is still gathering customer details.
    CollectingDetails,
    /// Assistant is answering.
    AiHandling,
    /// A human agent owns the conversation.
    HumanAgent,
    /// Assistant took the conversation back after a failed handoff.
    AiFallback,
    /// Conversation closed.
    Completed,
}

impl SessionStage {
    /// Stable lowercase label used in storage and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CollectingDetails => "collecting_details",
            Self::AiHandling => "ai_handling",
            Self::HumanAgent => "human_agent",
            Self::AiFallback => "ai_fallback",
            Self::Completed => "completed",
        }
    }

    /// Parse a stored label.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "collecting_details" => Some(Self::CollectingDetails),
            "ai_handling" => Some(Self::AiHandling),
            "human_agent" => Some(Self::HumanAgent),
            "ai_fallback" => Some(Self::AiFallback),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Determine whether a stage change is permitted.
    ///
    /// Re-entering `human_agent` covers agent-to-agent handoffs and
    /// re-entering `ai_fallback` covers repeated escalations.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionStage::{AiFallback, AiHandling, CollectingDetails, Completed, HumanAgent};
        match self {
            CollectingDetails => matches!(next, AiHandling | HumanAgent | AiFallback | Completed),
            AiHandling => matches!(next, AiHandling | HumanAgent | AiFallback | Completed),
            HumanAgent => matches!(next, HumanAgent | AiHandling | AiFallback | Completed),
            AiFallback => matches!(next, AiFallback | AiHandling | HumanAgent | Completed),
            Completed => false,
        }
    }
}

/// Support conversation owned by the session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ChatSession {
    /// Unique session identifier.
    pub id: String,
    /// Customer display name.
    pub customer_name: String,
    /// Service the customer needs help with.
    pub service_type: String,
    /// Agent currently responsible, if a human holds the chat.
    pub assigned_agent_id: Option<String>,
    /// Current lifecycle stage.
    pub stage: SessionStage,
    /// Priority flag raised when a handoff could not be placed.
    pub escalated: bool,
    /// Conversation history in arrival order.
    pub messages: Vec<ChatMessage>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// Construct a new session in the `collecting_details` stage.
    #[must_use]
    pub fn new(customer_name: String, service_type: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            customer_name,
            service_type,
            assigned_agent_id: None,
            stage: SessionStage::CollectingDetails,
            escalated: false,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The last `count` messages, oldest first.
    #[must_use]
    pub fn recent_messages(&self, count: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(count);
        self.messages[start..].to_vec()
    }
}
