//! Agent directory: roster, availability and capacity accounting.
//!
//! Every capacity mutation (offer reservation, chat assignment, release,
//! status change) runs under the owning agent's lock and persists the new
//! record before the in-memory copy is replaced. A failed save leaves the
//! agent untouched, so `current_chat_count <= max_concurrent_chats` holds
//! regardless of interleaving.

pub mod ranking;

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::agent::{Agent, AgentStatus, SessionMeta};
use crate::persistence::retry::retry_once;
use crate::store::AgentStore;
use crate::{AppError, Result};

pub use ranking::rank_candidates;

struct AgentSlot {
    id: String,
    agent: Mutex<Agent>,
}

/// What an agent was holding when it left the `online` status.
#[derive(Debug, Clone)]
pub struct StatusChange {
    /// Agent record after the change.
    pub agent: Agent,
    /// Status before the change.
    pub previous: AgentStatus,
    /// Chats the agent held and has now been relieved of.
    pub held_sessions: Vec<SessionMeta>,
    /// Unanswered offers withdrawn from the agent.
    pub pending_offers: Vec<String>,
}

/// Shared roster of human agents.
pub struct AgentDirectory {
    slots: RwLock<Vec<Arc<AgentSlot>>>,
    store: Arc<dyn AgentStore>,
}

impl AgentDirectory {
    /// Create an empty directory backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            store,
        }
    }

    /// Populate the roster from the store. Returns the number of agents.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Orchestrator` if the store stays unreachable.
    pub async fn load(&self) -> Result<usize> {
        let agents = retry_once("list_agents", || self.store.list_agents()).await?;
        let count = agents.len();
        let mut slots = self.slots.write();
        for agent in agents {
            if let Some(slot) = slots.iter().find(|slot| slot.id == agent.id) {
                // Only reachable before any traffic; a loaded record wins.
                if let Ok(mut held) = slot.agent.try_lock() {
                    *held = agent;
                }
                continue;
            }
            slots.push(Arc::new(AgentSlot {
                id: agent.id.clone(),
                agent: Mutex::new(agent),
            }));
        }
        info!(count, "agent roster loaded");
        Ok(count)
    }

    /// Add an agent, or refresh profile fields of a known one.
    ///
    /// Runtime state (status, held chats, metrics) of a known agent is kept.
    /// An agent missing from the roster but present in the store is adopted
    /// from its stored record rather than reset to the profile.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Orchestrator` if the record cannot be loaded or saved.
    pub async fn register(&self, profile: Agent) -> Result<Agent> {
        if let Some(slot) = self.slot(&profile.id) {
            let mut held = slot.agent.lock().await;
            let next = refresh_profile(held.clone(), profile);
            self.commit(&mut held, next).await?;
            return Ok(held.clone());
        }

        let stored = retry_once("load_agent", || self.store.load_agent(&profile.id)).await?;
        let profile = match stored {
            Some(mut known) => {
                // Offers are never persisted; any listed here are stale.
                known.pending_offers.clear();
                let mut next = refresh_profile(known, profile);
                next.updated_at = Utc::now();
                debug!(agent_id = %next.id, status = ?next.status, "agent adopted from store");
                next
            }
            None => profile,
        };
        retry_once("save_agent", || self.store.save_agent(&profile)).await?;
        let mut slots = self.slots.write();
        if let Some(slot) = slots.iter().find(|slot| slot.id == profile.id) {
            // Lost a registration race; the first writer's slot stays.
            debug!(agent_id = %slot.id, "agent registered concurrently");
        } else {
            slots.push(Arc::new(AgentSlot {
                id: profile.id.clone(),
                agent: Mutex::new(profile.clone()),
            }));
        }
        Ok(profile)
    }

    /// Current copy of one agent.
    pub async fn get(&self, agent_id: &str) -> Option<Agent> {
        let slot = self.slot(agent_id)?;
        let agent = slot.agent.lock().await;
        Some(agent.clone())
    }

    /// Current copy of every agent, in roster order.
    pub async fn snapshot(&self) -> Vec<Agent> {
        let slots = self.slots.read().clone();
        let mut agents = Vec::with_capacity(slots.len());
        for slot in slots {
            agents.push(slot.agent.lock().await.clone());
        }
        agents
    }

    /// Online agents with a free slot, best candidate first.
    pub async fn find_available_agents(
        &self,
        service_type: &str,
        exclude_agent_id: Option<&str>,
    ) -> Vec<Agent> {
        let candidates = self
            .snapshot()
            .await
            .into_iter()
            .filter(|agent| Some(agent.id.as_str()) != exclude_agent_id)
            .filter(|agent| agent.is_available() && agent.has_capacity())
            .collect();
        rank_candidates(candidates, service_type)
    }

    /// Hold one capacity slot on `agent_id` for an unanswered transfer.
    ///
    /// `persist` records the transfer while the agent lock is held, so a
    /// concurrent status change either sees both the offer and its record
    /// or neither. Offers live in memory only; a failed `persist` leaves
    /// no offer behind.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for unknown agents.
    /// - `AppError::CapacityExceeded` if the agent is not online or full.
    /// - Whatever `persist` returns.
    pub async fn reserve_offer<F, Fut>(
        &self,
        agent_id: &str,
        transfer_id: &str,
        persist: F,
    ) -> Result<Agent>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let slot = self.require(agent_id)?;
        let mut agent = slot.agent.lock().await;
        if agent.pending_offers.iter().any(|id| id == transfer_id) {
            return Ok(agent.clone());
        }
        if !agent.is_available() || !agent.has_capacity() {
            return Err(AppError::CapacityExceeded(format!(
                "agent {agent_id} cannot take another offer"
            )));
        }
        persist().await?;
        agent.pending_offers.push(transfer_id.to_owned());
        debug!(agent_id, transfer_id, load = agent.committed_load(), "offer reserved");
        Ok(agent.clone())
    }

    /// Give back the slot held by an offer. Returns whether it was held.
    pub async fn release_offer(&self, agent_id: &str, transfer_id: &str) -> bool {
        let Some(slot) = self.slot(agent_id) else {
            return false;
        };
        let mut agent = slot.agent.lock().await;
        let before = agent.pending_offers.len();
        agent.pending_offers.retain(|id| id != transfer_id);
        before != agent.pending_offers.len()
    }

    /// Check-and-increment the agent's chat count, then run `persist`.
    ///
    /// When `meta.transfer_id` is set the matching offer is converted into
    /// the chat; otherwise a free slot is required. `persist` runs under the
    /// agent lock after the new count is saved, so a status change cannot
    /// strip the chat before the caller has recorded it. If `persist` fails
    /// the chat is rolled back and any converted offer stays released.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for unknown agents, or when the offer for
    ///   `meta.transfer_id` is no longer held.
    /// - `AppError::CapacityExceeded` when no slot is free.
    /// - `AppError::Validation` if the agent already holds the session.
    /// - `AppError::Orchestrator` if the record cannot be saved.
    /// - Whatever `persist` returns.
    pub async fn assign_chat<F, Fut, T>(
        &self,
        agent_id: &str,
        meta: SessionMeta,
        persist: F,
    ) -> Result<(Agent, T)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let slot = self.require(agent_id)?;
        let mut agent = slot.agent.lock().await;
        let mut next = agent.clone();
        if let Some(transfer_id) = meta.transfer_id.as_deref() {
            let before = next.pending_offers.len();
            next.pending_offers.retain(|id| id != transfer_id);
            if before == next.pending_offers.len() {
                return Err(AppError::NotFound(format!(
                    "offer {transfer_id} is no longer held by agent {agent_id}"
                )));
            }
        }
        if agent.holds_session(&meta.session_id) {
            return Err(AppError::Validation(format!(
                "agent {agent_id} already holds session {}",
                meta.session_id
            )));
        }

        // An offer already holds its slot; a direct assignment needs a free one.
        let full = if meta.transfer_id.is_some() {
            next.current_chat_count >= next.max_concurrent_chats
        } else {
            !next.is_available() || !next.has_capacity()
        };
        if full {
            return Err(AppError::CapacityExceeded(format!(
                "agent {agent_id} is at capacity"
            )));
        }

        let session_id = meta.session_id.clone();
        next.active_sessions.push(meta);
        next.current_chat_count = next.current_chat_count.saturating_add(1);
        self.commit(&mut agent, next).await?;

        match persist().await {
            Ok(value) => {
                info!(
                    agent_id,
                    session_id = %session_id,
                    current_chat_count = agent.current_chat_count,
                    "chat assigned"
                );
                Ok((agent.clone(), value))
            }
            Err(err) => {
                let mut rollback = agent.clone();
                rollback.active_sessions.retain(|held| held.session_id != session_id);
                rollback.current_chat_count = rollback.current_chat_count.saturating_sub(1);
                rollback.updated_at = Utc::now();
                if let Err(save_err) =
                    retry_once("save_agent", || self.store.save_agent(&rollback)).await
                {
                    warn!(agent_id, %save_err, "failed to persist chat rollback");
                }
                *agent = rollback;
                warn!(agent_id, session_id = %session_id, %err, "chat assignment rolled back");
                Err(err)
            }
        }
    }

    /// Drop a held chat. Returns whether the agent held it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Orchestrator` if the record cannot be saved.
    pub async fn release_chat(&self, agent_id: &str, session_id: &str) -> Result<bool> {
        let Some(slot) = self.slot(agent_id) else {
            return Ok(false);
        };
        let mut agent = slot.agent.lock().await;
        if !agent.holds_session(session_id) {
            return Ok(false);
        }
        let mut next = agent.clone();
        next.active_sessions.retain(|meta| meta.session_id != session_id);
        next.current_chat_count = next.current_chat_count.saturating_sub(1);
        self.commit(&mut agent, next).await?;
        info!(
            agent_id,
            session_id,
            current_chat_count = agent.current_chat_count,
            "chat released"
        );
        Ok(true)
    }

    /// Change presence status.
    ///
    /// Leaving `online` strips every held chat and outstanding offer from
    /// the agent and hands them back to the caller for rerouting.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for unknown agents.
    /// - `AppError::Orchestrator` if the record cannot be saved.
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<StatusChange> {
        let slot = self.require(agent_id)?;
        let mut agent = slot.agent.lock().await;
        let previous = agent.status;
        let mut next = agent.clone();
        next.status = status;

        let mut held_sessions = Vec::new();
        let mut pending_offers = Vec::new();
        if status != AgentStatus::Online {
            held_sessions = std::mem::take(&mut next.active_sessions);
            pending_offers = std::mem::take(&mut next.pending_offers);
            next.current_chat_count = 0;
        }

        self.commit(&mut agent, next).await?;
        info!(
            agent_id,
            from = previous.as_str(),
            to = status.as_str(),
            released = held_sessions.len(),
            "agent status changed"
        );
        Ok(StatusChange {
            agent: agent.clone(),
            previous,
            held_sessions,
            pending_offers,
        })
    }

    /// Fold an observed response time into the agent's average.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Orchestrator` if the record cannot be saved.
    pub async fn record_response(&self, agent_id: &str, seconds: f64) -> Result<()> {
        let Some(slot) = self.slot(agent_id) else {
            return Ok(());
        };
        let mut agent = slot.agent.lock().await;
        let mut next = agent.clone();
        next.record_response(seconds);
        self.commit(&mut agent, next).await
    }

    fn slot(&self, agent_id: &str) -> Option<Arc<AgentSlot>> {
        self.slots
            .read()
            .iter()
            .find(|slot| slot.id == agent_id)
            .cloned()
    }

    fn require(&self, agent_id: &str) -> Result<Arc<AgentSlot>> {
        self.slot(agent_id)
            .ok_or_else(|| AppError::NotFound(format!("agent {agent_id} not found")))
    }

    async fn commit(&self, held: &mut Agent, mut next: Agent) -> Result<()> {
        next.updated_at = Utc::now();
        retry_once("save_agent", || self.store.save_agent(&next)).await?;
        *held = next;
        Ok(())
    }
}

fn refresh_profile(mut known: Agent, profile: Agent) -> Agent {
    known.display_name = profile.display_name;
    known.skills = profile.skills;
    known.max_concurrent_chats = profile.max_concurrent_chats.max(known.current_chat_count);
    known
}
