//! Interfaces to the stores this core consumes but does not own.
//!
//! The orchestrator and the delivery layer receive these as trait
//! objects at construction time, so tests and alternative backends can
//! substitute their own implementations.

use std::future::Future;
use std::pin::Pin;

use crate::models::agent::Agent;
use crate::models::message::{ChatMessage, MessageRole};
use crate::models::session::{ChatSession, SessionStage};
use crate::Result;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Conversation history and assignment state.
pub trait SessionStore: Send + Sync {
    /// Load a session with its full ordered history.
    ///
    /// Returns `Ok(None)` when the session does not exist.
    fn find_session<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ChatSession>>;

    /// Append one entry to a session's history.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for unknown sessions.
    fn append_message<'a>(
        &'a self,
        session_id: &'a str,
        role: MessageRole,
        text: &'a str,
        metadata: Option<serde_json::Value>,
    ) -> StoreFuture<'a, ChatMessage>;

    /// Record which agent holds the session and its stage.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`](crate::AppError::Validation) if the
    /// stage change is not permitted.
    fn set_assignment<'a>(
        &'a self,
        session_id: &'a str,
        agent_id: Option<&'a str>,
        stage: SessionStage,
    ) -> StoreFuture<'a, ChatSession>;

    /// Raise or clear the escalation priority flag.
    fn set_escalated<'a>(&'a self, session_id: &'a str, escalated: bool) -> StoreFuture<'a, ()>;
}

/// Durable copy of the agent roster.
pub trait AgentStore: Send + Sync {
    /// Load one agent.
    fn load_agent<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Agent>>;

    /// Insert or replace an agent record.
    fn save_agent<'a>(&'a self, agent: &'a Agent) -> StoreFuture<'a, ()>;

    /// Load every agent in stable roster order.
    fn list_agents(&self) -> StoreFuture<'_, Vec<Agent>>;
}
