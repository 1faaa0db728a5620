//! Agent roster repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::agent::{Agent, AgentStatus, SessionMeta, Skill};
use crate::store::{AgentStore, StoreFuture};
use crate::{AppError, Result};

use super::db::Database;
use super::{format_timestamp, parse_timestamp};

/// Repository wrapper around `SQLite` for agent records.
#[derive(Clone)]
pub struct AgentRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    display_name: String,
    status: String,
    max_concurrent_chats: i64,
    current_chat_count: i64,
    skills: String,
    avg_response_seconds: f64,
    avg_satisfaction: f64,
    active_sessions: String,
    updated_at: String,
}

impl AgentRow {
    fn into_agent(self) -> Result<Agent> {
        let status = AgentStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid agent status: {}", self.status)))?;
        let skills: Vec<Skill> = serde_json::from_str(&self.skills)
            .map_err(|e| AppError::Db(format!("invalid skills json: {e}")))?;
        let active_sessions: Vec<SessionMeta> = serde_json::from_str(&self.active_sessions)
            .map_err(|e| AppError::Db(format!("invalid active_sessions json: {e}")))?;
        let max_concurrent_chats = u32::try_from(self.max_concurrent_chats)
            .map_err(|e| AppError::Db(format!("invalid max_concurrent_chats: {e}")))?;
        let current_chat_count = u32::try_from(self.current_chat_count)
            .map_err(|e| AppError::Db(format!("invalid current_chat_count: {e}")))?;

        Ok(Agent {
            id: self.id,
            display_name: self.display_name,
            status,
            max_concurrent_chats,
            current_chat_count,
            skills,
            avg_response_seconds: self.avg_response_seconds,
            avg_satisfaction: self.avg_satisfaction,
            active_sessions,
            pending_offers: Vec::new(),
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

impl AgentRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace an agent record, keeping its roster position.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn upsert(&self, agent: &Agent) -> Result<()> {
        let skills = serde_json::to_string(&agent.skills)
            .map_err(|e| AppError::Db(format!("failed to encode skills: {e}")))?;
        let active_sessions = serde_json::to_string(&agent.active_sessions)
            .map_err(|e| AppError::Db(format!("failed to encode active_sessions: {e}")))?;

        sqlx::query(
            "INSERT INTO agent (id, display_name, status, max_concurrent_chats, current_chat_count,
             skills, avg_response_seconds, avg_satisfaction, active_sessions, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                status = excluded.status,
                max_concurrent_chats = excluded.max_concurrent_chats,
                current_chat_count = excluded.current_chat_count,
                skills = excluded.skills,
                avg_response_seconds = excluded.avg_response_seconds,
                avg_satisfaction = excluded.avg_satisfaction,
                active_sessions = excluded.active_sessions,
                updated_at = excluded.updated_at",
        )
        .bind(&agent.id)
        .bind(&agent.display_name)
        .bind(agent.status.as_str())
        .bind(i64::from(agent.max_concurrent_chats))
        .bind(i64::from(agent.current_chat_count))
        .bind(&skills)
        .bind(agent.avg_response_seconds)
        .bind(agent.avg_satisfaction)
        .bind(&active_sessions)
        .bind(format_timestamp(Utc::now()))
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Retrieve an agent by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agent WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(AgentRow::into_agent).transpose()
    }

    /// List every agent in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_all(&self) -> Result<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as("SELECT * FROM agent ORDER BY seq ASC")
            .fetch_all(self.db.as_ref())
            .await?;

        rows.into_iter().map(AgentRow::into_agent).collect()
    }
}

impl AgentStore for AgentRepo {
    fn load_agent<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Agent>> {
        Box::pin(self.get_by_id(id))
    }

    fn save_agent<'a>(&'a self, agent: &'a Agent) -> StoreFuture<'a, ()> {
        Box::pin(self.upsert(agent))
    }

    fn list_agents(&self) -> StoreFuture<'_, Vec<Agent>> {
        Box::pin(self.list_all())
    }
}
