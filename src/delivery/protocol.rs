//! JSON frames exchanged over delivery sockets.
//!
//! Inbound frames carry their data under `payload`; outbound frames are
//! flat objects discriminated by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::agent::AgentStatus;
use crate::models::transfer::{TransferPriority, TransferReason};

/// Which side of a conversation a connection belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    /// Human support agent.
    Agent,
    /// Customer attached to one session.
    Customer,
}

/// Credentials presented in the first frame of a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    /// Side of the conversation.
    pub user_type: UserType,
    /// Session a customer attaches to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Agent identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Agent secret, checked against the configured digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Chat text bound for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Target session. Customers may omit it; their session is implied.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Message text.
    pub message: String,
}

/// Typing indicator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    /// Session the indicator concerns.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Whether the sender is currently typing.
    pub is_typing: bool,
}

/// Agent presence change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    /// New presence status.
    pub status: AgentStatus,
}

/// Frames sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame on a connection.
    Authenticate(AuthPayload),
    /// Agent reply to a customer.
    AgentMessage(MessagePayload),
    /// Customer text for the assigned agent.
    CustomerMessage(MessagePayload),
    /// Typing indicator, relayed to the other side.
    Typing(TypingPayload),
    /// Agent presence change.
    StatusUpdate(StatusPayload),
    /// Liveness check.
    Heartbeat,
}

/// Frames sent to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// Authentication succeeded.
    Authenticated {
        /// Side of the conversation.
        user_type: UserType,
        /// Agent id or session id the connection is bound to.
        id: String,
    },
    /// Agent text delivered to a customer.
    AgentMessage {
        /// Session the text belongs to.
        session_id: String,
        /// Stored message id.
        message_id: String,
        /// Sending agent.
        agent_id: String,
        /// Message text.
        message: String,
        /// Persisted timestamp.
        timestamp: DateTime<Utc>,
    },
    /// Customer text delivered to the assigned agent.
    CustomerMessage {
        /// Session the text belongs to.
        session_id: String,
        /// Stored message id.
        message_id: String,
        /// Message text.
        message: String,
        /// Persisted timestamp.
        timestamp: DateTime<Utc>,
    },
    /// Typing indicator from the other side.
    Typing {
        /// Session the indicator concerns.
        session_id: String,
        /// Who is typing.
        from: UserType,
        /// Whether typing is in progress.
        is_typing: bool,
    },
    /// An agent changed presence.
    StatusUpdate {
        /// Agent whose status changed.
        agent_id: String,
        /// New status.
        status: AgentStatus,
    },
    /// Reply to `heartbeat`.
    HeartbeatResponse {
        /// Server clock.
        timestamp: DateTime<Utc>,
    },
    /// A session is offered to the receiving agent.
    TransferRequest {
        /// Offer identifier, used to accept or decline.
        transfer_id: String,
        /// Session on offer.
        session_id: String,
        /// Customer display name.
        customer_name: String,
        /// Service the customer needs.
        service_type: String,
        /// Why the handoff happened.
        reason: TransferReason,
        /// Urgency.
        priority: TransferPriority,
        /// Conversation summary.
        summary: String,
        /// Expected answer time for this agent.
        estimated_wait_seconds: u64,
    },
    /// A handoff was accepted.
    TransferAccepted {
        /// Accepted transfer.
        transfer_id: String,
        /// Session now held by the agent.
        session_id: String,
        /// Agent taking over.
        agent_id: String,
        /// Name shown to the customer.
        agent_name: String,
    },
    /// A handoff was declined.
    TransferDeclined {
        /// Declined transfer.
        transfer_id: String,
        /// Session concerned.
        session_id: String,
        /// Agent that declined.
        agent_id: String,
        /// Whether another agent was offered the session.
        rerouted: bool,
    },
    /// An offer was withdrawn before it was answered.
    TransferCancelled {
        /// Withdrawn transfer.
        transfer_id: String,
        /// Session concerned.
        session_id: String,
        /// Why it was withdrawn.
        reason: String,
    },
    /// Conversational status text for a customer.
    SystemMessage {
        /// Session concerned.
        session_id: String,
        /// Text to display.
        message: String,
    },
    /// Request rejected.
    Error {
        /// Error class, e.g. `unauthorized`.
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

impl ServerFrame {
    /// Error frame for a rejected request.
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_owned(),
            message: message.into(),
        }
    }
}
