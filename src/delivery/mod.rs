//! Real-time delivery layer.
//!
//! Holds one registry of agent connections and one of customer
//! connections. Chat text is always persisted before a live delivery is
//! attempted; the live send is best-effort and a missing or closed socket
//! only bumps the drop counter.

pub mod auth;
pub mod protocol;
pub mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::models::agent::AgentStatus;
use crate::models::message::{ChatMessage, MessageRole};
use crate::persistence::retry::retry_once;
use crate::store::SessionStore;
use crate::{AppError, Result};

use protocol::{ServerFrame, UserType};
use registry::ConnectionRegistry;

/// Outbound notification seam used by the orchestrator.
pub trait TransferNotifier: Send + Sync {
    /// Push a frame to an agent. Returns whether it reached a live socket.
    fn notify_agent(&self, agent_id: &str, frame: ServerFrame) -> bool;

    /// Push a frame to a session's customer. Returns whether it was delivered.
    fn notify_customer(&self, session_id: &str, frame: ServerFrame) -> bool;

    /// Tell every connected agent about a presence change. Returns the count reached.
    fn broadcast_status(&self, agent_id: &str, status: AgentStatus) -> usize;
}

/// Live-delivery counters.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DeliveryCounts {
    /// Frames handed to a live socket.
    pub delivered: u64,
    /// Frames with no live socket to go to.
    pub dropped: u64,
}

impl DeliveryStats {
    fn record(&self, delivered: bool) {
        let counter = if delivered {
            &self.delivered
        } else {
            &self.dropped
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    #[must_use]
    pub fn counts(&self) -> DeliveryCounts {
        DeliveryCounts {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Connection registries plus persist-then-deliver routing.
pub struct DeliveryHub {
    agents: ConnectionRegistry,
    customers: ConnectionRegistry,
    sessions: Arc<dyn SessionStore>,
    stats: DeliveryStats,
}

impl DeliveryHub {
    /// Create a hub with empty registries.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            agents: ConnectionRegistry::new(),
            customers: ConnectionRegistry::new(),
            sessions,
            stats: DeliveryStats::default(),
        }
    }

    /// Agent connections.
    #[must_use]
    pub fn agents(&self) -> &ConnectionRegistry {
        &self.agents
    }

    /// Customer connections, keyed by session id.
    #[must_use]
    pub fn customers(&self) -> &ConnectionRegistry {
        &self.customers
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> DeliveryCounts {
        self.stats.counts()
    }

    /// Persist an agent reply, then push it to the customer if connected.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the session does not exist.
    /// - `AppError::Unauthorized` if `agent_id` is not the assigned agent.
    /// - `AppError::Orchestrator` if persistence fails after one retry.
    pub async fn agent_message(
        &self,
        agent_id: &str,
        session_id: &str,
        text: &str,
    ) -> Result<ChatMessage> {
        let session = retry_once("find_session", || self.sessions.find_session(session_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
        if session.assigned_agent_id.as_deref() != Some(agent_id) {
            return Err(AppError::Unauthorized(format!(
                "agent {agent_id} is not assigned to session {session_id}"
            )));
        }

        let message = retry_once("append_message", || {
            self.sessions.append_message(
                session_id,
                MessageRole::Agent,
                text,
                Some(json!({ "agent_id": agent_id })),
            )
        })
        .await?;

        let frame = ServerFrame::AgentMessage {
            session_id: session_id.to_owned(),
            message_id: message.id.clone(),
            agent_id: agent_id.to_owned(),
            message: message.content.clone(),
            timestamp: message.created_at,
        };
        self.deliver(&self.customers, session_id, frame);
        Ok(message)
    }

    /// Persist customer text, then push it to the assigned agent if any.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the session does not exist.
    /// - `AppError::Orchestrator` if persistence fails after one retry.
    pub async fn customer_message(&self, session_id: &str, text: &str) -> Result<ChatMessage> {
        let message = retry_once("append_message", || {
            self.sessions
                .append_message(session_id, MessageRole::Customer, text, None)
        })
        .await?;

        let assigned = retry_once("find_session", || self.sessions.find_session(session_id))
            .await?
            .and_then(|session| session.assigned_agent_id);
        if let Some(agent_id) = assigned {
            let frame = ServerFrame::CustomerMessage {
                session_id: session_id.to_owned(),
                message_id: message.id.clone(),
                message: message.content.clone(),
                timestamp: message.created_at,
            };
            self.deliver(&self.agents, &agent_id, frame);
        } else {
            debug!(session_id, "no assigned agent, customer message stored only");
        }
        Ok(message)
    }

    /// Relay a typing indicator to the other side of a session.
    ///
    /// Never persisted; lookup failures are swallowed.
    pub async fn typing(&self, from: UserType, session_id: &str, is_typing: bool) -> bool {
        let frame = ServerFrame::Typing {
            session_id: session_id.to_owned(),
            from,
            is_typing,
        };
        match from {
            UserType::Agent => self.customers.send(session_id, frame),
            UserType::Customer => {
                let assigned = match self.sessions.find_session(session_id).await {
                    Ok(session) => session.and_then(|s| s.assigned_agent_id),
                    Err(err) => {
                        debug!(session_id, %err, "typing lookup failed");
                        None
                    }
                };
                assigned.is_some_and(|agent_id| self.agents.send(&agent_id, frame))
            }
        }
    }

    fn deliver(&self, registry: &ConnectionRegistry, key: &str, frame: ServerFrame) -> bool {
        let delivered = registry.send(key, frame);
        self.stats.record(delivered);
        if !delivered {
            debug!(key, "no live connection, frame dropped");
        }
        delivered
    }
}

impl TransferNotifier for DeliveryHub {
    fn notify_agent(&self, agent_id: &str, frame: ServerFrame) -> bool {
        self.deliver(&self.agents, agent_id, frame)
    }

    fn notify_customer(&self, session_id: &str, frame: ServerFrame) -> bool {
        self.deliver(&self.customers, session_id, frame)
    }

    fn broadcast_status(&self, agent_id: &str, status: AgentStatus) -> usize {
        let frame = ServerFrame::StatusUpdate {
            agent_id: agent_id.to_owned(),
            status,
        };
        self.agents.broadcast(&frame, None)
    }
}
