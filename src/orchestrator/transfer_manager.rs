//! Request, accept, decline, complete and cancel.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};

use crate::delivery::protocol::ServerFrame;
use crate::models::agent::SessionMeta;
use crate::models::message::{ChatMessage, MessageRole};
use crate::models::queue::QueueEntry;
use crate::models::session::SessionStage;
use crate::models::transfer::{
    Transfer, TransferMetrics, TransferStatus, TransferTrigger,
};
use crate::persistence::retry::retry_once;
use crate::{AppError, Result};

use super::{
    notices, AgentSummary, DeclineOutcome, RequestStatus, TransferOrchestrator, TransferOutcome,
    TransferRequest,
};

/// Result of completing a transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionOutcome {
    /// The transfer in its final state.
    pub transfer: Transfer,
    /// Analytics timings.
    pub metrics: TransferMetrics,
}

impl TransferOrchestrator {
    /// Find an agent for a session, or queue it when nobody is free.
    ///
    /// Queuing is a normal outcome, never an error, and never leaves a
    /// `failed` transfer behind.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for unknown sessions.
    /// - `AppError::Validation` for closed sessions, out-of-range confidence,
    ///   a handing agent that does not hold the session, or a session that
    ///   already has a pending transfer.
    /// - `AppError::Orchestrator` when persistence fails after one retry.
    pub async fn request_transfer(&self, request: TransferRequest) -> Result<TransferOutcome> {
        let span = info_span!(
            "request_transfer",
            session_id = %request.session_id,
            reason = request.reason.as_str(),
            priority = request.priority.as_str(),
        );

        async move {
            // ── Validate ─────────────────────────────────────
            if let Some(confidence) = request.confidence {
                if !(0.0..=1.0).contains(&confidence) {
                    return Err(AppError::Validation(format!(
                        "confidence must be between 0 and 1, got {confidence}"
                    )));
                }
            }
            let session = self.load_session(&request.session_id).await?;
            if session.stage == SessionStage::Completed {
                return Err(AppError::Validation(format!(
                    "session {} is completed",
                    session.id
                )));
            }
            if let Some(from) = request.from_agent_id.as_deref() {
                if session.assigned_agent_id.as_deref() != Some(from) {
                    return Err(AppError::Validation(format!(
                        "agent {from} does not hold session {}",
                        session.id
                    )));
                }
            } else if let Some(holder) = session.assigned_agent_id.as_deref() {
                return Err(AppError::Validation(format!(
                    "session {} is held by agent {holder}; set from_agent_id to hand it over",
                    session.id
                )));
            }
            let pending = retry_once("pending_for_session", || {
                self.transfers.get_pending_for_session(&session.id)
            })
            .await?;
            if let Some(pending) = pending {
                return Err(AppError::Validation(format!(
                    "session {} already has pending transfer {}",
                    session.id, pending.id
                )));
            }

            // ── Place ────────────────────────────────────────
            let context =
                self.build_context(&session, request.summary.clone(), request.confidence);
            let mut excluded = Vec::new();
            if let Some(exclude) = request.exclude_agent_id.as_deref() {
                excluded.push(exclude);
            }
            if let Some(from) = request.from_agent_id.as_deref() {
                excluded.push(from);
            }
            let placement = self
                .place(&session, &excluded, |to| {
                    Transfer::new(
                        session.id.clone(),
                        request.from_agent_id.clone(),
                        to,
                        request.reason,
                        request.priority,
                        TransferTrigger::Manual,
                        context.clone(),
                    )
                })
                .await?;

            if let Some(placement) = placement {
                return Ok(TransferOutcome {
                    status: RequestStatus::Assigned,
                    transfer_id: Some(placement.transfer.id.clone()),
                    agent: Some(AgentSummary::from(&placement.agent)),
                    estimated_wait_seconds: placement.estimated_wait_seconds,
                    queue_position: None,
                });
            }

            // ── Queue ────────────────────────────────────────
            let entry = QueueEntry {
                session_id: session.id.clone(),
                reason: request.reason,
                priority: request.priority,
                from_agent_id: request.from_agent_id.clone(),
                exclude_agent_id: request.exclude_agent_id.clone(),
                summary: Some(context.summary.clone()),
                confidence: request.confidence,
                escalated: false,
                queued_at: Utc::now(),
                attempts: 0,
            };
            let position = self.enqueue(&entry).await?;
            let estimated_wait_seconds =
                u64::from(position).saturating_mul(self.settings.queued_wait_seconds);
            self.notifier.notify_customer(
                &session.id,
                ServerFrame::SystemMessage {
                    session_id: session.id.clone(),
                    message: notices::queued(position, estimated_wait_seconds),
                },
            );

            Ok(TransferOutcome {
                status: RequestStatus::Queued,
                transfer_id: None,
                agent: None,
                estimated_wait_seconds,
                queue_position: Some(position),
            })
        }
        .instrument(span)
        .await
    }

    /// Take over a session offered to `agent_id`.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the transfer is unknown, not offered to
    ///   `agent_id`, or already resolved (including by a concurrent accept).
    /// - `AppError::CapacityExceeded` if the agent lost a capacity race; the
    ///   transfer is failed and rerouted.
    /// - `AppError::Orchestrator` when persistence fails after one retry. If
    ///   the session could not be assigned, the agent's slot is given back and
    ///   the transfer is completed unsuccessfully.
    pub async fn accept_transfer(
        &self,
        transfer_id: &str,
        agent_id: &str,
        handoff_message: Option<&str>,
    ) -> Result<Transfer> {
        let span = info_span!("accept_transfer", transfer_id, agent_id);

        async move {
            let transfer = self.load_transfer(transfer_id).await?;
            if transfer.to_agent_id != agent_id || transfer.status != TransferStatus::Pending {
                return Err(AppError::NotFound(format!(
                    "no pending transfer {transfer_id} for agent {agent_id}"
                )));
            }
            let session = self.load_session(&transfer.session_id).await?;
            let predecessor = retry_once("accepted_for_session", || {
                self.transfers.get_accepted_for_session(&session.id)
            })
            .await?;

            // ── Claim capacity and commit ────────────────────
            let meta = SessionMeta {
                session_id: session.id.clone(),
                customer_name: session.customer_name.clone(),
                service_type: session.service_type.clone(),
                transfer_id: Some(transfer.id.clone()),
                assigned_at: Utc::now(),
            };
            // Runs under the agent lock: a concurrent status change either
            // withdraws the offer first or finds the session assigned.
            let claimed = self
                .directory
                .assign_chat(agent_id, meta, || self.commit_accept(&transfer, agent_id))
                .await;
            let (agent, accepted) = match claimed {
                Ok(claimed) => claimed,
                Err(AppError::CapacityExceeded(detail)) => {
                    warn!(transfer_id, agent_id, "capacity race lost on accept");
                    let failed = retry_once("fail_transfer", || {
                        self.transfers.resolve_pending(
                            transfer_id,
                            TransferStatus::Failed,
                            Some("capacity exceeded on accept"),
                        )
                    })
                    .await?;
                    if let Some(failed) = failed {
                        self.directory.release_offer(agent_id, transfer_id).await;
                        self.reroute(&failed, agent_id).await?;
                    }
                    return Err(AppError::CapacityExceeded(detail));
                }
                Err(err) => return Err(err),
            };

            if session.escalated {
                if let Err(err) =
                    retry_once("set_escalated", || self.sessions.set_escalated(&session.id, false))
                        .await
                {
                    warn!(%err, "failed to clear escalation flag");
                }
            }

            let greeting = handoff_message.map_or_else(
                || notices::greeting(&session.customer_name, &agent.display_name),
                str::to_owned,
            );
            let metadata = json!({
                "kind": "handoff",
                "transfer_id": accepted.id,
                "agent_id": agent_id,
            });
            let message = match retry_once("append_message", || {
                self.sessions.append_message(
                    &session.id,
                    MessageRole::Agent,
                    &greeting,
                    Some(metadata.clone()),
                )
            })
            .await
            {
                Ok(message) => message,
                Err(err) => {
                    // The handoff stands; only the transcript misses the greeting.
                    warn!(%err, "failed to store handoff greeting");
                    ChatMessage::new(
                        session.id.clone(),
                        MessageRole::Agent,
                        greeting.clone(),
                        Some(metadata),
                    )
                }
            };

            // ── Previous holder ──────────────────────────────
            if let Some(previous) = predecessor.filter(|p| p.id != accepted.id) {
                if previous.to_agent_id != agent_id {
                    self.directory
                        .release_chat(&previous.to_agent_id, &session.id)
                        .await?;
                }
                retry_once("complete_transfer", || {
                    self.transfers.mark_completed(&previous.id, true)
                })
                .await?;
                info!(
                    previous_transfer_id = %previous.id,
                    previous_agent_id = %previous.to_agent_id,
                    "previous holder released"
                );
            }

            // ── Notify ───────────────────────────────────────
            self.notifier.notify_customer(
                &session.id,
                ServerFrame::TransferAccepted {
                    transfer_id: accepted.id.clone(),
                    session_id: session.id.clone(),
                    agent_id: agent_id.to_owned(),
                    agent_name: agent.display_name.clone(),
                },
            );
            self.notifier.notify_customer(
                &session.id,
                ServerFrame::AgentMessage {
                    session_id: session.id.clone(),
                    message_id: message.id.clone(),
                    agent_id: agent_id.to_owned(),
                    message: message.content.clone(),
                    timestamp: message.created_at,
                },
            );
            self.notifier.notify_customer(
                &session.id,
                ServerFrame::SystemMessage {
                    session_id: session.id.clone(),
                    message: notices::connected(&agent.display_name),
                },
            );
            if let Some(from) = accepted.from_agent_id.as_deref() {
                self.notifier.notify_agent(
                    from,
                    ServerFrame::TransferAccepted {
                        transfer_id: accepted.id.clone(),
                        session_id: session.id.clone(),
                        agent_id: agent_id.to_owned(),
                        agent_name: agent.display_name.clone(),
                    },
                );
            }

            if let Some(responded) = accepted.responded_at {
                #[allow(clippy::cast_precision_loss)]
                let seconds = (responded - accepted.requested_at).num_milliseconds() as f64 / 1000.0;
                if let Err(err) = self.directory.record_response(agent_id, seconds).await {
                    warn!(%err, "failed to record response time");
                }
            }

            info!(session_id = %session.id, "transfer accepted");
            Ok(accepted)
        }
        .instrument(span)
        .await
    }

    /// Mark the transfer accepted and hand the session to `agent_id`.
    ///
    /// A failed assignment completes the transfer unsuccessfully so that no
    /// accepted transfer is left pointing at a session the agent never got.
    async fn commit_accept(&self, transfer: &Transfer, agent_id: &str) -> Result<Transfer> {
        let accepted = retry_once("accept_transfer", || self.transfers.mark_accepted(&transfer.id))
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("transfer {} was resolved concurrently", transfer.id))
            })?;

        if let Err(err) = retry_once("set_assignment", || {
            self.sessions.set_assignment(
                &transfer.session_id,
                Some(agent_id),
                SessionStage::HumanAgent,
            )
        })
        .await
        {
            warn!(transfer_id = %transfer.id, %err, "assignment failed, abandoning accepted transfer");
            if let Err(undo) =
                retry_once("complete_transfer", || self.transfers.mark_completed(&transfer.id, false))
                    .await
            {
                warn!(transfer_id = %transfer.id, err = %undo, "failed to close abandoned transfer");
            }
            return Err(err);
        }
        Ok(accepted)
    }

    /// Refuse an offer and pass the session on.
    ///
    /// The session is offered to the next best agent, excluding the decliner
    /// and any handing agent. When nobody is left, or the reroute limit is
    /// reached, the session is escalated: flagged, queued as urgent and
    /// usually handed back to the assistant in `ai_fallback`. In an
    /// agent-to-agent handoff where the handing agent still holds the chat,
    /// escalation leaves the session in `human_agent` with that agent; only
    /// the flag and the urgent queue entry are added.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the transfer is unknown, not offered to
    ///   `agent_id`, or already resolved.
    /// - `AppError::Orchestrator` when persistence fails after one retry.
    pub async fn decline_transfer(
        &self,
        transfer_id: &str,
        agent_id: &str,
        reason: Option<&str>,
    ) -> Result<DeclineOutcome> {
        let span = info_span!("decline_transfer", transfer_id, agent_id);

        async move {
            let transfer = self.load_transfer(transfer_id).await?;
            if transfer.to_agent_id != agent_id || transfer.status != TransferStatus::Pending {
                return Err(AppError::NotFound(format!(
                    "no pending transfer {transfer_id} for agent {agent_id}"
                )));
            }

            let declined = retry_once("decline_transfer", || {
                self.transfers
                    .resolve_pending(transfer_id, TransferStatus::Declined, reason)
            })
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("transfer {transfer_id} was resolved concurrently"))
            })?;
            self.directory.release_offer(agent_id, transfer_id).await;
            info!(reason, "transfer declined");

            let outcome = self.reroute(&declined, agent_id).await?.into_decline();
            if outcome.rerouted {
                if let Some(from) = declined.from_agent_id.as_deref() {
                    self.notifier.notify_agent(
                        from,
                        ServerFrame::TransferDeclined {
                            transfer_id: declined.id.clone(),
                            session_id: declined.session_id.clone(),
                            agent_id: agent_id.to_owned(),
                            rerouted: true,
                        },
                    );
                }
            }
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Close out an accepted transfer and report its timings.
    ///
    /// A successful completion closes the session; otherwise the
    /// conversation returns to the assistant.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for unknown transfers or a lost race.
    /// - `AppError::Validation` if the transfer is not `accepted`.
    /// - `AppError::Orchestrator` when persistence fails after one retry.
    pub async fn complete_transfer(
        &self,
        transfer_id: &str,
        success: bool,
    ) -> Result<CompletionOutcome> {
        let span = info_span!("complete_transfer", transfer_id, success);

        async move {
            let transfer = self.load_transfer(transfer_id).await?;
            if transfer.status != TransferStatus::Accepted {
                return Err(AppError::Validation(format!(
                    "transfer {transfer_id} is {}, not accepted",
                    transfer.status.as_str()
                )));
            }

            let completed = retry_once("complete_transfer", || {
                self.transfers.mark_completed(transfer_id, success)
            })
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("transfer {transfer_id} was resolved concurrently"))
            })?;
            self.directory
                .release_chat(&completed.to_agent_id, &completed.session_id)
                .await?;

            let session = self.load_session(&completed.session_id).await?;
            if session.assigned_agent_id.as_deref() == Some(completed.to_agent_id.as_str()) {
                let (stage, notice) = if success {
                    (SessionStage::Completed, notices::session_closed())
                } else {
                    (SessionStage::AiHandling, notices::returned_to_assistant())
                };
                retry_once("set_assignment", || {
                    self.sessions.set_assignment(&session.id, None, stage)
                })
                .await?;
                self.notifier.notify_customer(
                    &session.id,
                    ServerFrame::SystemMessage {
                        session_id: session.id.clone(),
                        message: notice,
                    },
                );
            }

            let metrics = TransferMetrics::for_transfer(&completed).ok_or_else(|| {
                AppError::Orchestrator(format!("transfer {transfer_id} is missing timestamps"))
            })?;
            info!(
                transfer_time_seconds = metrics.transfer_time_seconds,
                resolution_time_seconds = metrics.resolution_time_seconds,
                "transfer completed"
            );

            if let Err(err) = self.reconcile_queue().await {
                warn!(%err, "queue reconciliation after completion failed");
            }
            Ok(CompletionOutcome {
                transfer: completed,
                metrics,
            })
        }
        .instrument(span)
        .await
    }

    /// Withdraw an unanswered offer without rerouting.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for unknown or already resolved transfers.
    /// - `AppError::Orchestrator` when persistence fails after one retry.
    pub async fn cancel_transfer(&self, transfer_id: &str, reason: Option<&str>) -> Result<Transfer> {
        let span = info_span!("cancel_transfer", transfer_id);

        async move {
            let note = reason.unwrap_or("cancelled");
            let cancelled = retry_once("cancel_transfer", || {
                self.transfers
                    .resolve_pending(transfer_id, TransferStatus::Failed, Some(note))
            })
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no pending transfer {transfer_id}")))?;

            self.withdraw_offer(&cancelled, note).await;
            info!(session_id = %cancelled.session_id, "transfer cancelled");
            Ok(cancelled)
        }
        .instrument(span)
        .await
    }

    /// Pending offers addressed to an agent, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown agents.
    pub async fn get_pending_transfers(&self, agent_id: &str) -> Result<Vec<Transfer>> {
        if self.directory.get(agent_id).await.is_none() {
            return Err(AppError::NotFound(format!("agent {agent_id} not found")));
        }
        retry_once("pending_for_agent", || {
            self.transfers.list_pending_for_agent(agent_id)
        })
        .await
    }

    /// Every transfer recorded for a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions.
    pub async fn list_transfers_for_session(&self, session_id: &str) -> Result<Vec<Transfer>> {
        self.load_session(session_id).await?;
        retry_once("transfers_for_session", || {
            self.transfers.list_for_session(session_id)
        })
        .await
    }

    /// Release the slot of a failed offer and tell the agent it is gone.
    pub(crate) async fn withdraw_offer(&self, failed: &Transfer, reason: &str) {
        self.directory
            .release_offer(&failed.to_agent_id, &failed.id)
            .await;
        self.notifier.notify_agent(
            &failed.to_agent_id,
            ServerFrame::TransferCancelled {
                transfer_id: failed.id.clone(),
                session_id: failed.session_id.clone(),
                reason: reason.to_owned(),
            },
        );
    }
}
