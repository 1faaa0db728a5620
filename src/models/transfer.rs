//! Transfer record: one attempt at handing a session to an agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::ChatMessage;

/// Who is handing the conversation off.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferSource {
    /// The automated assistant.
    Ai,
    /// Another human agent.
    Agent,
}

/// Why the handoff was requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferReason {
    /// Customer asked for a human.
    CustomerRequest,
    /// Assistant decided to escalate.
    AiEscalation,
    /// Question too complex for the current responder.
    ComplexityEscalation,
    /// Current responder lacks the needed skill.
    SkillMismatch,
    /// Technical problem on the current side.
    TechnicalIssue,
    /// Current agent became unavailable.
    AgentUnavailable,
    /// Rebalancing load between agents.
    WorkloadBalance,
    /// Urgent situation.
    Emergency,
}

/// Handoff urgency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TransferPriority {
    /// Routine.
    Low,
    /// Default.
    Medium,
    /// Needs quick attention.
    High,
    /// Immediate attention.
    Urgent,
}

/// Lifecycle status for a transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Offered to the target agent, awaiting an answer.
    Pending,
    /// Target agent took the conversation.
    Accepted,
    /// Target agent refused.
    Declined,
    /// Completed after being accepted.
    Completed,
    /// Cancelled, timed out or lost to a capacity race.
    Failed,
}

/// What created the transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferTrigger {
    /// Explicit handoff request from the assistant or an agent.
    Manual,
    /// Reroute after a decline, timeout or agent going offline.
    Automatic,
}

macro_rules! label_enum {
    ($ty:ty { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $ty {
            /// Stable lowercase label used in storage and on the wire.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            /// Parse a stored label.
            #[must_use]
            pub fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $($label => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

label_enum!(TransferSource { Ai => "ai", Agent => "agent" });
label_enum!(TransferReason {
    CustomerRequest => "customer_request",
    AiEscalation => "ai_escalation",
    ComplexityEscalation => "complexity_escalation",
    SkillMismatch => "skill_mismatch",
    TechnicalIssue => "technical_issue",
    AgentUnavailable => "agent_unavailable",
    WorkloadBalance => "workload_balance",
    Emergency => "emergency",
});
label_enum!(TransferPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});
label_enum!(TransferStatus {
    Pending => "pending",
    Accepted => "accepted",
    Declined => "declined",
    Completed => "completed",
    Failed => "failed",
});
label_enum!(TransferTrigger { Manual => "manual", Automatic => "automatic" });

impl TransferPriority {
    /// Numeric rank used for queue ordering; higher is more urgent.
    #[must_use]
    pub fn rank(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }
}

impl TransferStatus {
    /// Determine whether a status transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Accepted | Self::Declined | Self::Failed
            ) | (Self::Accepted, Self::Completed)
        )
    }

    /// Terminal statuses never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::Completed | Self::Failed)
    }
}

/// Conversation snapshot carried with a transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TransferContext {
    /// Short description of the conversation so far.
    pub summary: String,
    /// Trailing conversation messages, oldest first.
    pub recent_messages: Vec<ChatMessage>,
    /// Assistant confidence when it asked for help, 0.0 to 1.0.
    pub confidence: Option<f64>,
}

/// A single handoff attempt. Reroutes create new records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Transfer {
    /// Unique record identifier.
    pub id: String,
    /// Session being handed off.
    pub session_id: String,
    /// Who hands off.
    pub from_type: TransferSource,
    /// Handing agent when `from_type` is `agent`.
    pub from_agent_id: Option<String>,
    /// Agent being offered the session.
    pub to_agent_id: String,
    /// Why the handoff happened.
    pub reason: TransferReason,
    /// Urgency.
    pub priority: TransferPriority,
    /// Current lifecycle status.
    pub status: TransferStatus,
    /// Origin of the record.
    pub trigger: TransferTrigger,
    /// Conversation snapshot.
    pub context: TransferContext,
    /// Reroutes preceding this attempt in its chain.
    pub reroute_count: u32,
    /// Attempt this one replaced, if rerouted.
    pub parent_transfer_id: Option<String>,
    /// Decline or failure note.
    pub resolution_note: Option<String>,
    /// Outcome flag recorded on completion.
    pub success: Option<bool>,
    /// Creation timestamp.
    pub requested_at: DateTime<Utc>,
    /// When the target agent answered.
    pub responded_at: Option<DateTime<Utc>>,
    /// When the transfer was completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// Construct a new pending transfer.
    #[must_use]
    pub fn new(
        session_id: String,
        from_agent_id: Option<String>,
        to_agent_id: String,
        reason: TransferReason,
        priority: TransferPriority,
        trigger: TransferTrigger,
        context: TransferContext,
    ) -> Self {
        let from_type = if from_agent_id.is_some() {
            TransferSource::Agent
        } else {
            TransferSource::Ai
        };
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            from_type,
            from_agent_id,
            to_agent_id,
            reason,
            priority,
            status: TransferStatus::Pending,
            trigger,
            context,
            reroute_count: 0,
            parent_transfer_id: None,
            resolution_note: None,
            success: None,
            requested_at: Utc::now(),
            responded_at: None,
            completed_at: None,
        }
    }

    /// Build the follow-up attempt for a different agent, keeping the snapshot.
    #[must_use]
    pub fn reroute_to(&self, to_agent_id: String) -> Self {
        let mut next = Self::new(
            self.session_id.clone(),
            self.from_agent_id.clone(),
            to_agent_id,
            self.reason,
            self.priority,
            TransferTrigger::Automatic,
            self.context.clone(),
        );
        next.reroute_count = self.reroute_count.saturating_add(1);
        next.parent_transfer_id = Some(self.id.clone());
        next
    }
}

/// Analytics timings computed when a transfer completes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TransferMetrics {
    /// `responded_at - requested_at`, in seconds.
    pub transfer_time_seconds: i64,
    /// `completed_at - responded_at`, in seconds.
    pub resolution_time_seconds: i64,
}

impl TransferMetrics {
    /// Compute timings for a completed transfer; `None` while incomplete.
    #[must_use]
    pub fn for_transfer(transfer: &Transfer) -> Option<Self> {
        let responded = transfer.responded_at?;
        let completed = transfer.completed_at?;
        Some(Self {
            transfer_time_seconds: (responded - transfer.requested_at).num_seconds(),
            resolution_time_seconds: (completed - responded).num_seconds(),
        })
    }
}
