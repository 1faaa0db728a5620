//! Sessions waiting for an agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transfer::{TransferPriority, TransferReason};

/// A session parked until capacity frees up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct QueueEntry {
    /// Waiting session.
    pub session_id: String,
    /// Reason carried into the eventual transfer.
    pub reason: TransferReason,
    /// Priority carried into the eventual transfer.
    pub priority: TransferPriority,
    /// Handing agent for agent-to-agent requests.
    pub from_agent_id: Option<String>,
    /// Agent that must not receive the session.
    pub exclude_agent_id: Option<String>,
    /// Caller-supplied conversation summary.
    pub summary: Option<String>,
    /// Caller-supplied confidence signal.
    pub confidence: Option<f64>,
    /// Entered the queue through escalation.
    pub escalated: bool,
    /// When the session was first queued.
    pub queued_at: DateTime<Utc>,
    /// Reconciliation attempts made so far.
    pub attempts: u32,
}
