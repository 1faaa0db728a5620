//! Transfer orchestration.
//!
//! [`TransferOrchestrator`] owns the transfer state machine and the handoff
//! queue. It reaches agents through the [`AgentDirectory`], conversations
//! through a [`SessionStore`], and sockets through a [`TransferNotifier`];
//! all three are injected at construction.

pub mod maintenance;
mod notices;
pub mod presence;
pub mod transfer_manager;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::HandoffConfig;
use crate::delivery::protocol::ServerFrame;
use crate::delivery::TransferNotifier;
use crate::directory::AgentDirectory;
use crate::models::agent::Agent;
use crate::models::message::MessageRole;
use crate::models::queue::QueueEntry;
use crate::models::session::{ChatSession, SessionStage};
use crate::models::transfer::{Transfer, TransferContext, TransferPriority, TransferReason};
use crate::persistence::queue_repo::QueueRepo;
use crate::persistence::retry::retry_once;
use crate::persistence::transfer_repo::TransferRepo;
use crate::store::SessionStore;
use crate::{AppError, Result};

/// Whether a handoff request found an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// A pending transfer was offered to an agent.
    Assigned,
    /// No agent was free; the session waits in the queue.
    Queued,
}

/// Public view of the agent chosen for a handoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentSummary {
    /// Agent identifier.
    pub id: String,
    /// Name shown to customers.
    pub display_name: String,
}

impl From<&Agent> for AgentSummary {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            display_name: agent.display_name.clone(),
        }
    }
}

/// Input to [`TransferOrchestrator::request_transfer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferRequest {
    /// Session to hand off.
    pub session_id: String,
    /// Why the handoff is requested.
    pub reason: TransferReason,
    /// Urgency.
    #[serde(default = "default_priority")]
    pub priority: TransferPriority,
    /// Agent that must not be offered the session.
    #[serde(default)]
    pub exclude_agent_id: Option<String>,
    /// Agent currently holding the session, for agent-to-agent handoffs.
    #[serde(default)]
    pub from_agent_id: Option<String>,
    /// Conversation summary; generated when absent.
    #[serde(default)]
    pub summary: Option<String>,
    /// Caller confidence, 0.0 to 1.0.
    #[serde(default)]
    pub confidence: Option<f64>,
}

fn default_priority() -> TransferPriority {
    TransferPriority::Medium
}

impl TransferRequest {
    /// Minimal request from the assistant.
    #[must_use]
    pub fn new(session_id: impl Into<String>, reason: TransferReason, priority: TransferPriority) -> Self {
        Self {
            session_id: session_id.into(),
            reason,
            priority,
            exclude_agent_id: None,
            from_agent_id: None,
            summary: None,
            confidence: None,
        }
    }
}

/// Result of a handoff request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferOutcome {
    /// Assigned or queued.
    pub status: RequestStatus,
    /// Pending transfer, when assigned.
    pub transfer_id: Option<String>,
    /// Offered agent, when assigned.
    pub agent: Option<AgentSummary>,
    /// Expected seconds until an agent picks the session up.
    pub estimated_wait_seconds: u64,
    /// 1-based queue position, when queued.
    pub queue_position: Option<u32>,
}

/// Result of a decline. Exactly one of `rerouted` and `escalated` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeclineOutcome {
    /// A new pending transfer went to another agent.
    pub rerouted: bool,
    /// No agent was left; the session was escalated. It stays with the
    /// handing agent if that agent still holds it.
    pub escalated: bool,
    /// New pending transfer, when rerouted.
    pub transfer_id: Option<String>,
    /// Newly offered agent, when rerouted.
    pub agent_id: Option<String>,
}

/// Where a stale or declined offer ended up.
#[derive(Debug, Clone)]
pub(crate) enum Reroute {
    /// Offered to another agent.
    Rerouted(Placement),
    /// Escalated back to the assistant.
    Escalated,
    /// The session is gone or closed; nothing to do.
    Abandoned,
}

impl Reroute {
    fn into_decline(self) -> DeclineOutcome {
        match self {
            Self::Rerouted(placement) => DeclineOutcome {
                rerouted: true,
                escalated: false,
                transfer_id: Some(placement.transfer.id),
                agent_id: Some(placement.agent.id),
            },
            Self::Escalated | Self::Abandoned => DeclineOutcome {
                rerouted: false,
                escalated: true,
                transfer_id: None,
                agent_id: None,
            },
        }
    }
}

/// A pending transfer together with the agent holding its offer.
#[derive(Debug, Clone)]
pub(crate) struct Placement {
    pub(crate) transfer: Transfer,
    pub(crate) agent: Agent,
    pub(crate) estimated_wait_seconds: u64,
}

/// Handoff state machine over the directory, session store and queue.
pub struct TransferOrchestrator {
    directory: Arc<AgentDirectory>,
    sessions: Arc<dyn SessionStore>,
    transfers: TransferRepo,
    queue: QueueRepo,
    notifier: Arc<dyn TransferNotifier>,
    settings: HandoffConfig,
    reconcile_gate: Mutex<()>,
}

impl TransferOrchestrator {
    /// Wire the orchestrator to its collaborators.
    #[must_use]
    pub fn new(
        directory: Arc<AgentDirectory>,
        sessions: Arc<dyn SessionStore>,
        transfers: TransferRepo,
        queue: QueueRepo,
        notifier: Arc<dyn TransferNotifier>,
        settings: HandoffConfig,
    ) -> Self {
        Self {
            directory,
            sessions,
            transfers,
            queue,
            notifier,
            settings,
            reconcile_gate: Mutex::new(()),
        }
    }

    /// Shared agent directory.
    #[must_use]
    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.directory
    }

    /// Handoff tuning in effect.
    #[must_use]
    pub fn settings(&self) -> &HandoffConfig {
        &self.settings
    }

    async fn load_session(&self, session_id: &str) -> Result<ChatSession> {
        retry_once("find_session", || self.sessions.find_session(session_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))
    }

    async fn load_transfer(&self, transfer_id: &str) -> Result<Transfer> {
        retry_once("get_transfer", || self.transfers.get_by_id(transfer_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transfer {transfer_id} not found")))
    }

    fn build_context(
        &self,
        session: &ChatSession,
        summary: Option<String>,
        confidence: Option<f64>,
    ) -> TransferContext {
        let summary = summary.unwrap_or_else(|| {
            format!(
                "{} needs help with {} ({} messages so far)",
                session.customer_name,
                session.service_type,
                session.messages.len()
            )
        });
        TransferContext {
            summary,
            recent_messages: session.recent_messages(self.settings.context_message_count),
            confidence,
        }
    }

    /// Offer the session to the best available agent not in `excluded`.
    ///
    /// Candidates that fill up between ranking and reservation are skipped.
    /// Returns `Ok(None)` when no candidate could take the offer.
    async fn place<F>(
        &self,
        session: &ChatSession,
        excluded: &[&str],
        make: F,
    ) -> Result<Option<Placement>>
    where
        F: Fn(String) -> Transfer,
    {
        let candidates = self
            .directory
            .find_available_agents(&session.service_type, excluded.first().copied())
            .await;

        for candidate in candidates
            .into_iter()
            .filter(|agent| !excluded.contains(&agent.id.as_str()))
        {
            let transfer = make(candidate.id.clone());
            // The row is written under the agent lock, so a status change
            // in between always finds the offer together with its row.
            let reserved = self
                .directory
                .reserve_offer(&candidate.id, &transfer.id, || async {
                    retry_once("create_transfer", || self.transfers.create(&transfer))
                        .await
                        .map(|_| ())
                })
                .await;
            match reserved {
                Ok(_) => {}
                Err(AppError::CapacityExceeded(_)) => {
                    debug!(agent_id = %candidate.id, "candidate filled up, trying next");
                    continue;
                }
                Err(err) => return Err(err),
            }

            let estimated_wait_seconds = candidate.estimated_wait_seconds();
            self.notifier.notify_agent(
                &candidate.id,
                ServerFrame::TransferRequest {
                    transfer_id: transfer.id.clone(),
                    session_id: session.id.clone(),
                    customer_name: session.customer_name.clone(),
                    service_type: session.service_type.clone(),
                    reason: transfer.reason,
                    priority: transfer.priority,
                    summary: transfer.context.summary.clone(),
                    estimated_wait_seconds,
                },
            );
            self.notifier.notify_customer(
                &session.id,
                ServerFrame::SystemMessage {
                    session_id: session.id.clone(),
                    message: notices::connecting(&candidate.display_name),
                },
            );
            if let Err(err) = retry_once("dequeue", || self.queue.remove(&session.id)).await {
                warn!(session_id = %session.id, %err, "failed to clear queue entry");
            }

            info!(
                transfer_id = %transfer.id,
                session_id = %session.id,
                agent_id = %candidate.id,
                reroute_count = transfer.reroute_count,
                "transfer offered"
            );
            return Ok(Some(Placement {
                transfer,
                agent: candidate,
                estimated_wait_seconds,
            }));
        }
        Ok(None)
    }

    /// Offer the session behind a resolved transfer to somebody else.
    ///
    /// Escalates once the reroute chain reaches `max_reroutes` or nobody is
    /// left.
    pub(crate) async fn reroute(&self, previous: &Transfer, exclude_agent_id: &str) -> Result<Reroute> {
        let session = match retry_once("find_session", || {
            self.sessions.find_session(&previous.session_id)
        })
        .await?
        {
            Some(session) if session.stage != SessionStage::Completed => session,
            _ => return Ok(Reroute::Abandoned),
        };

        if previous.reroute_count >= self.settings.max_reroutes {
            warn!(
                transfer_id = %previous.id,
                session_id = %session.id,
                reroute_count = previous.reroute_count,
                "reroute limit reached"
            );
        } else {
            let mut excluded = vec![exclude_agent_id];
            if let Some(from) = previous.from_agent_id.as_deref() {
                excluded.push(from);
            }
            if let Some(placement) = self
                .place(&session, &excluded, |to| previous.reroute_to(to))
                .await?
            {
                return Ok(Reroute::Rerouted(placement));
            }
        }

        self.escalate(&session, previous, Some(exclude_agent_id)).await?;
        Ok(Reroute::Escalated)
    }

    /// Hand the session back to the assistant with a priority flag.
    ///
    /// A session still held by its handing agent stays with that agent.
    async fn escalate(
        &self,
        session: &ChatSession,
        previous: &Transfer,
        exclude_agent_id: Option<&str>,
    ) -> Result<()> {
        let held_by_agent = session.stage == SessionStage::HumanAgent
            && session.assigned_agent_id.is_some()
            && session.assigned_agent_id == previous.from_agent_id;

        if !held_by_agent {
            retry_once("set_assignment", || {
                self.sessions
                    .set_assignment(&session.id, None, SessionStage::AiFallback)
            })
            .await?;
        }
        retry_once("set_escalated", || self.sessions.set_escalated(&session.id, true)).await?;

        let text = notices::escalated();
        retry_once("append_message", || {
            self.sessions.append_message(
                &session.id,
                MessageRole::System,
                &text,
                Some(json!({
                    "kind": "escalation",
                    "transfer_id": previous.id,
                    "reason": previous.reason.as_str(),
                })),
            )
        })
        .await?;

        let entry = QueueEntry {
            session_id: session.id.clone(),
            reason: previous.reason,
            priority: TransferPriority::Urgent,
            from_agent_id: if held_by_agent {
                previous.from_agent_id.clone()
            } else {
                None
            },
            exclude_agent_id: exclude_agent_id.map(str::to_owned),
            summary: Some(previous.context.summary.clone()),
            confidence: previous.context.confidence,
            escalated: true,
            queued_at: Utc::now(),
            attempts: 0,
        };
        retry_once("enqueue", || self.queue.enqueue(&entry)).await?;

        self.notifier.notify_customer(
            &session.id,
            ServerFrame::SystemMessage {
                session_id: session.id.clone(),
                message: text.clone(),
            },
        );
        if let Some(from) = previous.from_agent_id.as_deref() {
            self.notifier.notify_agent(
                from,
                ServerFrame::TransferDeclined {
                    transfer_id: previous.id.clone(),
                    session_id: session.id.clone(),
                    agent_id: previous.to_agent_id.clone(),
                    rerouted: false,
                },
            );
        }

        warn!(
            session_id = %session.id,
            transfer_id = %previous.id,
            held_by_agent,
            "session escalated"
        );
        Ok(())
    }

    /// Park a session until capacity frees up. Returns its queue position.
    async fn enqueue(&self, entry: &QueueEntry) -> Result<u32> {
        retry_once("enqueue", || self.queue.enqueue(entry)).await?;
        let position = retry_once("queue_position", || self.queue.position(&entry.session_id))
            .await?
            .unwrap_or(1);
        info!(
            session_id = %entry.session_id,
            position,
            priority = entry.priority.as_str(),
            "session queued"
        );
        Ok(position)
    }
}
