//! Chat session repository for `SQLite` persistence.
//!
//! This is the crate's own adapter for the [`SessionStore`] interface;
//! the orchestrator only ever sees the trait.

use std::sync::Arc;

use chrono::Utc;

use crate::models::message::{ChatMessage, MessageRole};
use crate::models::session::{ChatSession, SessionStage};
use crate::store::{SessionStore, StoreFuture};
use crate::{AppError, Result};

use super::db::Database;
use super::{format_timestamp, parse_timestamp};

/// Repository wrapper around `SQLite` for sessions and their history.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    customer_name: String,
    service_type: String,
    assigned_agent_id: Option<String>,
    stage: String,
    escalated: i64,
    created_at: String,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    metadata: Option<String>,
    created_at: String,
}

impl SessionRow {
    fn into_session(self, messages: Vec<ChatMessage>) -> Result<ChatSession> {
        let stage = SessionStage::parse(&self.stage)
            .ok_or_else(|| AppError::Db(format!("invalid session stage: {}", self.stage)))?;
        Ok(ChatSession {
            id: self.id,
            customer_name: self.customer_name,
            service_type: self.service_type,
            assigned_agent_id: self.assigned_agent_id,
            stage,
            escalated: self.escalated != 0,
            messages,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

impl MessageRow {
    fn into_message(self) -> Result<ChatMessage> {
        let role = MessageRole::parse(&self.role)
            .ok_or_else(|| AppError::Db(format!("invalid message role: {}", self.role)))?;
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid message metadata: {e}")))?;
        Ok(ChatMessage {
            id: self.id,
            session_id: self.session_id,
            role,
            content: self.content,
            metadata,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record (history is written separately).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &ChatSession) -> Result<ChatSession> {
        sqlx::query(
            "INSERT INTO chat_session (id, customer_name, service_type, assigned_agent_id,
             stage, escalated, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&session.id)
        .bind(&session.customer_name)
        .bind(&session.service_type)
        .bind(&session.assigned_agent_id)
        .bind(session.stage.as_str())
        .bind(i64::from(session.escalated))
        .bind(format_timestamp(session.created_at))
        .bind(format_timestamp(session.updated_at))
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session and its ordered history.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<ChatSession>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM chat_session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let messages = self.messages_for(id).await?;
        row.into_session(messages).map(Some)
    }

    /// Ordered history for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn messages_for(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, session_id, role, content, metadata, created_at
             FROM chat_message WHERE session_id = ?1 ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Append a message to an existing session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Db` if the insert fails.
    pub async fn append(
        &self,
        session_id: &str,
        role: MessageRole,
        text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<ChatMessage> {
        self.require_exists(session_id).await?;

        let message = ChatMessage::new(session_id.to_owned(), role, text.to_owned(), metadata);
        let metadata_json = message.metadata.as_ref().map(ToString::to_string);

        sqlx::query(
            "INSERT INTO chat_message (id, session_id, role, content, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&metadata_json)
        .bind(format_timestamp(message.created_at))
        .execute(self.db.as_ref())
        .await?;

        sqlx::query("UPDATE chat_session SET updated_at = ?1 WHERE id = ?2")
            .bind(format_timestamp(Utc::now()))
            .bind(session_id)
            .execute(self.db.as_ref())
            .await?;

        Ok(message)
    }

    /// Update assignment and stage, respecting the stage transition table.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions and
    /// `AppError::Validation` for forbidden stage changes.
    pub async fn update_assignment(
        &self,
        session_id: &str,
        agent_id: Option<&str>,
        stage: SessionStage,
    ) -> Result<ChatSession> {
        let current = self
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

        if !current.stage.can_transition_to(stage) {
            return Err(AppError::Validation(format!(
                "session {session_id} cannot move from {} to {}",
                current.stage.as_str(),
                stage.as_str()
            )));
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE chat_session SET assigned_agent_id = ?1, stage = ?2, updated_at = ?3
             WHERE id = ?4",
        )
        .bind(agent_id)
        .bind(stage.as_str())
        .bind(format_timestamp(now))
        .bind(session_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(ChatSession {
            assigned_agent_id: agent_id.map(str::to_owned),
            stage,
            updated_at: now,
            ..current
        })
    }

    /// Raise or clear the escalation flag.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions.
    pub async fn update_escalated(&self, session_id: &str, escalated: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE chat_session SET escalated = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(i64::from(escalated))
        .bind(format_timestamp(Utc::now()))
        .bind(session_id)
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session {session_id} not found")));
        }
        Ok(())
    }

    async fn require_exists(&self, session_id: &str) -> Result<()> {
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM chat_session WHERE id = ?1")
                .bind(session_id)
                .fetch_optional(self.db.as_ref())
                .await?;
        exists
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))
    }
}

impl SessionStore for SessionRepo {
    fn find_session<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ChatSession>> {
        Box::pin(self.get_by_id(id))
    }

    fn append_message<'a>(
        &'a self,
        session_id: &'a str,
        role: MessageRole,
        text: &'a str,
        metadata: Option<serde_json::Value>,
    ) -> StoreFuture<'a, ChatMessage> {
        Box::pin(self.append(session_id, role, text, metadata))
    }

    fn set_assignment<'a>(
        &'a self,
        session_id: &'a str,
        agent_id: Option<&'a str>,
        stage: SessionStage,
    ) -> StoreFuture<'a, ChatSession> {
        Box::pin(self.update_assignment(session_id, agent_id, stage))
    }

    fn set_escalated<'a>(&'a self, session_id: &'a str, escalated: bool) -> StoreFuture<'a, ()> {
        Box::pin(self.update_escalated(session_id, escalated))
    }
}
