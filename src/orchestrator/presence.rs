//! Agent presence changes and session shutdown.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};

use crate::delivery::protocol::ServerFrame;
use crate::models::agent::{Agent, AgentStatus, SessionMeta};
use crate::models::message::MessageRole;
use crate::models::queue::QueueEntry;
use crate::models::session::{ChatSession, SessionStage};
use crate::models::transfer::{
    Transfer, TransferPriority, TransferReason, TransferStatus, TransferTrigger,
};
use crate::persistence::retry::retry_once;
use crate::Result;

use super::{notices, Reroute, TransferOrchestrator};

/// What a status change did to the agent's workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusOutcome {
    /// Agent after the change.
    pub agent: Agent,
    /// New pending transfers created for displaced sessions and offers.
    pub rerouted: Vec<String>,
    /// Sessions handed back to the assistant.
    pub fallback: Vec<String>,
    /// Sessions that could not be moved; they stay queued if queuing got
    /// that far, and are retried by queue reconciliation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

/// Where a session held by a departing agent ended up.
enum Displacement {
    /// Offered to another agent under this transfer id.
    Rerouted(String),
    /// Handed back to the assistant and queued.
    FellBack,
    /// Already closed or moved on; nothing to do.
    Released,
}

impl TransferOrchestrator {
    /// Change an agent's presence.
    ///
    /// Leaving `online` reroutes every unanswered offer and every held
    /// session; sessions nobody can take fall back to the assistant with a
    /// context-preserving system message. Coming online drains the queue.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for unknown agents.
    /// - `AppError::Orchestrator` when persistence fails after one retry.
    pub async fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<StatusOutcome> {
        let span = info_span!("set_agent_status", agent_id, status = status.as_str());

        async move {
            let change = self.directory.set_status(agent_id, status).await?;
            let mut outcome = StatusOutcome {
                agent: change.agent.clone(),
                rerouted: Vec::new(),
                fallback: Vec::new(),
                unresolved: Vec::new(),
            };

            // ── Withdrawn offers ─────────────────────────────
            for transfer_id in &change.pending_offers {
                let failed = retry_once("fail_transfer", || {
                    self.transfers.resolve_pending(
                        transfer_id,
                        TransferStatus::Failed,
                        Some("agent went offline"),
                    )
                })
                .await?;
                let Some(failed) = failed else { continue };
                match self.reroute(&failed, agent_id).await? {
                    Reroute::Rerouted(placement) => outcome.rerouted.push(placement.transfer.id),
                    Reroute::Escalated => outcome.fallback.push(failed.session_id),
                    Reroute::Abandoned => {}
                }
            }

            // ── Held sessions ────────────────────────────────
            for meta in &change.held_sessions {
                match self.displace(&change.agent, meta).await {
                    Ok(Displacement::Rerouted(transfer_id)) => outcome.rerouted.push(transfer_id),
                    Ok(Displacement::FellBack) => outcome.fallback.push(meta.session_id.clone()),
                    Ok(Displacement::Released) => {}
                    Err(err) => {
                        warn!(session_id = %meta.session_id, %err, "failed to move held session");
                        outcome.unresolved.push(meta.session_id.clone());
                    }
                }
            }

            self.notifier.broadcast_status(agent_id, status);

            if status == AgentStatus::Online && change.previous != AgentStatus::Online {
                if let Err(err) = self.reconcile_queue().await {
                    warn!(%err, "queue reconciliation after status change failed");
                }
                if let Some(agent) = self.directory.get(agent_id).await {
                    outcome.agent = agent;
                }
            }

            info!(
                from = change.previous.as_str(),
                rerouted = outcome.rerouted.len(),
                fallback = outcome.fallback.len(),
                unresolved = outcome.unresolved.len(),
                "agent status applied"
            );
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Move one session off an agent that left.
    ///
    /// Any failure to offer the session elsewhere ends in a fallback, so a
    /// displaced session is never left assigned to the departed agent.
    async fn displace(&self, agent: &Agent, meta: &SessionMeta) -> Result<Displacement> {
        let accepted = retry_once("accepted_for_session", || {
            self.transfers.get_accepted_for_session(&meta.session_id)
        })
        .await?;
        if let Some(accepted) = accepted.filter(|t| t.to_agent_id == agent.id) {
            if let Err(err) = retry_once("complete_transfer", || {
                self.transfers.mark_completed(&accepted.id, false)
            })
            .await
            {
                // The next accept on this session completes it instead.
                warn!(transfer_id = %accepted.id, %err, "failed to close displaced transfer");
            }
        }

        let session = self.load_session(&meta.session_id).await?;
        if session.stage == SessionStage::Completed
            || session.assigned_agent_id.as_deref() != Some(agent.id.as_str())
        {
            return Ok(Displacement::Released);
        }

        match self.reroute_displaced(&session, agent).await {
            Ok(Some(transfer_id)) => return Ok(Displacement::Rerouted(transfer_id)),
            Ok(None) => {}
            Err(err) => {
                warn!(session_id = %session.id, %err, "reroute of displaced session failed");
            }
        }

        let text = notices::agent_unavailable(&agent.display_name);
        self.fall_back(&session, agent, &text).await?;
        Ok(Displacement::FellBack)
    }

    /// Return the session to the assistant and offer it to another agent.
    async fn reroute_displaced(&self, session: &ChatSession, agent: &Agent) -> Result<Option<String>> {
        let session = retry_once("set_assignment", || {
            self.sessions
                .set_assignment(&session.id, None, SessionStage::AiHandling)
        })
        .await?;

        let context = self.build_context(&session, None, None);
        let placement = self
            .place(&session, &[agent.id.as_str()], |to| {
                Transfer::new(
                    session.id.clone(),
                    Some(agent.id.clone()),
                    to,
                    TransferReason::AgentUnavailable,
                    TransferPriority::High,
                    TransferTrigger::Automatic,
                    context.clone(),
                )
            })
            .await?;
        Ok(placement.map(|placement| placement.transfer.id))
    }

    /// Hand the session to the assistant and queue it for the next free agent.
    ///
    /// The queue entry is written first so that reconciliation picks the
    /// session up even if a later step fails.
    async fn fall_back(&self, session: &ChatSession, agent: &Agent, text: &str) -> Result<()> {
        let entry = QueueEntry {
            session_id: session.id.clone(),
            reason: TransferReason::AgentUnavailable,
            priority: TransferPriority::High,
            from_agent_id: None,
            exclude_agent_id: Some(agent.id.clone()),
            summary: None,
            confidence: None,
            escalated: false,
            queued_at: Utc::now(),
            attempts: 0,
        };
        self.enqueue(&entry).await?;

        retry_once("set_assignment", || {
            self.sessions
                .set_assignment(&session.id, None, SessionStage::AiFallback)
        })
        .await?;
        retry_once("append_message", || {
            self.sessions.append_message(
                &session.id,
                MessageRole::System,
                text,
                Some(json!({
                    "kind": "agent_unavailable",
                    "previous_agent_id": agent.id,
                    "context_messages": session.messages.len(),
                })),
            )
        })
        .await?;

        self.notifier.notify_customer(
            &session.id,
            ServerFrame::SystemMessage {
                session_id: session.id.clone(),
                message: text.to_owned(),
            },
        );
        warn!(session_id = %session.id, agent_id = %agent.id, "session fell back to assistant");
        Ok(())
    }

    /// Close a conversation and free everything attached to it.
    ///
    /// Idempotent: ending a completed session returns it unchanged.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for unknown sessions.
    /// - `AppError::Orchestrator` when persistence fails after one retry.
    pub async fn end_session(&self, session_id: &str) -> Result<ChatSession> {
        let span = info_span!("end_session", session_id);

        async move {
            let session = self.load_session(session_id).await?;
            if session.stage == SessionStage::Completed {
                return Ok(session);
            }

            let pending = retry_once("pending_for_session", || {
                self.transfers.get_pending_for_session(session_id)
            })
            .await?;
            if let Some(pending) = pending {
                let failed = retry_once("fail_transfer", || {
                    self.transfers.resolve_pending(
                        &pending.id,
                        TransferStatus::Failed,
                        Some("session ended"),
                    )
                })
                .await?;
                if let Some(failed) = failed {
                    self.withdraw_offer(&failed, "session ended").await;
                }
            }

            let accepted = retry_once("accepted_for_session", || {
                self.transfers.get_accepted_for_session(session_id)
            })
            .await?;
            if let Some(accepted) = accepted {
                retry_once("complete_transfer", || {
                    self.transfers.mark_completed(&accepted.id, true)
                })
                .await?;
                self.directory
                    .release_chat(&accepted.to_agent_id, session_id)
                    .await?;
            }
            if let Some(holder) = session.assigned_agent_id.as_deref() {
                self.directory.release_chat(holder, session_id).await?;
            }

            retry_once("dequeue", || self.queue.remove(session_id)).await?;
            let closed = retry_once("set_assignment", || {
                self.sessions
                    .set_assignment(session_id, None, SessionStage::Completed)
            })
            .await?;
            self.notifier.notify_customer(
                session_id,
                ServerFrame::SystemMessage {
                    session_id: session_id.to_owned(),
                    message: notices::session_closed(),
                },
            );
            info!("session ended");

            if let Err(err) = self.reconcile_queue().await {
                warn!(%err, "queue reconciliation after session end failed");
            }
            Ok(closed)
        }
        .instrument(span)
        .await
    }
}
