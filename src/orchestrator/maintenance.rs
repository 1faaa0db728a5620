//! Background upkeep: stale offer sweep, queue reconciliation and
//! startup recovery.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::models::queue::QueueEntry;
use crate::models::session::SessionStage;
use crate::models::transfer::{Transfer, TransferStatus, TransferTrigger};
use crate::persistence::retry::retry_once;
use crate::{AppError, Result};

use super::TransferOrchestrator;

impl TransferOrchestrator {
    /// Fail pending transfers older than the configured timeout and
    /// reroute their sessions. Returns the number of transfers failed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Orchestrator` when persistence fails after one retry.
    pub async fn sweep_stale(&self) -> Result<usize> {
        let timeout = chrono::Duration::from_std(self.settings.pending_timeout())
            .map_err(|e| AppError::Config(format!("pending timeout out of range: {e}")))?;
        let cutoff = Utc::now() - timeout;
        let stale = retry_once("pending_before", || self.transfers.list_pending_before(cutoff)).await?;

        let mut failed_count = 0;
        for transfer in stale {
            let failed = retry_once("fail_transfer", || {
                self.transfers.resolve_pending(
                    &transfer.id,
                    TransferStatus::Failed,
                    Some("offer timed out"),
                )
            })
            .await?;
            let Some(failed) = failed else {
                continue;
            };
            failed_count += 1;
            self.withdraw_offer(&failed, "offer timed out").await;
            warn!(
                transfer_id = %failed.id,
                agent_id = %failed.to_agent_id,
                "pending transfer timed out"
            );
            if let Err(err) = self.reroute(&failed, &failed.to_agent_id).await {
                error!(transfer_id = %failed.id, %err, "reroute after timeout failed");
            }
        }
        Ok(failed_count)
    }

    /// Offer queued sessions to agents that have room, most urgent first.
    /// Returns the number of sessions placed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Orchestrator` when the queue cannot be read.
    pub async fn reconcile_queue(&self) -> Result<usize> {
        let _gate = self.reconcile_gate.lock().await;
        let entries = retry_once("list_queue", || self.queue.list_ordered()).await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let mut placed = 0;
        for entry in entries {
            match self.reconcile_entry(&entry).await {
                Ok(true) => placed += 1,
                Ok(false) => {}
                Err(AppError::NoAgentsAvailable(_)) => {
                    if let Err(err) =
                        retry_once("queue_attempt", || self.queue.record_attempt(&entry.session_id))
                            .await
                    {
                        warn!(session_id = %entry.session_id, %err, "failed to count attempt");
                    }
                }
                Err(err) => {
                    warn!(session_id = %entry.session_id, %err, "queued session not placed");
                }
            }
        }
        if placed > 0 {
            info!(placed, "queue reconciled");
        }
        Ok(placed)
    }

    /// Try one queued session. `Ok(false)` means the entry needed no offer.
    async fn reconcile_entry(&self, entry: &QueueEntry) -> Result<bool> {
        let session = retry_once("find_session", || self.sessions.find_session(&entry.session_id))
            .await?;
        let Some(session) = session.filter(|s| s.stage != SessionStage::Completed) else {
            retry_once("dequeue", || self.queue.remove(&entry.session_id)).await?;
            return Ok(false);
        };

        let mut held_by = session.assigned_agent_id.clone();
        if let Some(holder) = held_by.as_deref() {
            let holds = self
                .directory
                .get(holder)
                .await
                .is_some_and(|agent| agent.holds_session(&session.id));
            if !holds {
                // Left behind by an agent whose departure was not fully applied.
                debug!(session_id = %session.id, agent_id = holder, "ignoring stale assignment");
                held_by = None;
            }
        }
        let from_agent_id = entry
            .from_agent_id
            .clone()
            .filter(|from| held_by.as_deref() == Some(from.as_str()));
        if held_by.is_some() && from_agent_id.is_none() {
            debug!(session_id = %session.id, "queued session already held by an agent");
            retry_once("dequeue", || self.queue.remove(&session.id)).await?;
            return Ok(false);
        }

        let pending = retry_once("pending_for_session", || {
            self.transfers.get_pending_for_session(&session.id)
        })
        .await?;
        if pending.is_some() {
            return Ok(false);
        }

        // The excluded agent is skipped on the first attempt only.
        let mut excluded = Vec::new();
        if entry.attempts == 0 {
            if let Some(exclude) = entry.exclude_agent_id.as_deref() {
                excluded.push(exclude);
            }
        }
        if let Some(from) = from_agent_id.as_deref() {
            excluded.push(from);
        }

        let context = self.build_context(&session, entry.summary.clone(), entry.confidence);
        let placement = self
            .place(&session, &excluded, |to| {
                Transfer::new(
                    session.id.clone(),
                    from_agent_id.clone(),
                    to,
                    entry.reason,
                    entry.priority,
                    TransferTrigger::Automatic,
                    context.clone(),
                )
            })
            .await?;
        match placement {
            Some(_) => Ok(true),
            None => Err(AppError::NoAgentsAvailable(format!(
                "no agent free for session {}",
                session.id
            ))),
        }
    }

    /// Fail offers left pending by a previous process and queue their
    /// sessions. Offers only live in memory, so none of them can be
    /// answered any more. Returns the number of transfers recovered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Orchestrator` when persistence fails after one retry.
    pub async fn recover_on_startup(&self) -> Result<usize> {
        let span = info_span!("recover_on_startup");

        async move {
            let pending = retry_once("list_pending", || self.transfers.list_pending()).await?;
            let mut recovered = 0;
            for transfer in pending {
                let failed = retry_once("fail_transfer", || {
                    self.transfers.resolve_pending(
                        &transfer.id,
                        TransferStatus::Failed,
                        Some("server restarted"),
                    )
                })
                .await?;
                let Some(failed) = failed else { continue };
                recovered += 1;

                let entry = QueueEntry {
                    session_id: failed.session_id.clone(),
                    reason: failed.reason,
                    priority: failed.priority,
                    from_agent_id: failed.from_agent_id.clone(),
                    exclude_agent_id: None,
                    summary: Some(failed.context.summary.clone()),
                    confidence: failed.context.confidence,
                    escalated: false,
                    queued_at: failed.requested_at,
                    attempts: 0,
                };
                self.enqueue(&entry).await?;
            }
            if recovered > 0 {
                warn!(recovered, "pending transfers from a previous run were requeued");
            }
            Ok(recovered)
        }
        .instrument(span)
        .await
    }
}

/// Spawn the stale-offer sweep.
///
/// Runs every `sweep_interval_seconds` until `cancel` fires.
#[must_use]
pub fn spawn_sweeper(
    orchestrator: Arc<TransferOrchestrator>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = orchestrator.settings().sweep_interval();
    tokio::spawn(
        async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("transfer sweeper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        match orchestrator.sweep_stale().await {
                            Ok(0) => {}
                            Ok(count) => info!(count, "stale transfers swept"),
                            Err(err) => error!(%err, "stale transfer sweep failed"),
                        }
                    }
                }
            }
        }
        .instrument(info_span!("transfer_sweeper")),
    )
}

/// Spawn the queue reconciler.
///
/// Runs every `reconcile_interval_seconds` until `cancel` fires.
#[must_use]
pub fn spawn_reconciler(
    orchestrator: Arc<TransferOrchestrator>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = orchestrator.settings().reconcile_interval();
    tokio::spawn(
        async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("queue reconciler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(err) = orchestrator.reconcile_queue().await {
                            error!(%err, "queue reconciliation failed");
                        }
                    }
                }
            }
        }
        .instrument(info_span!("queue_reconciler")),
    )
}
