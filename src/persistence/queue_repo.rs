//! Handoff queue repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::queue::QueueEntry;
use crate::models::transfer::{TransferPriority, TransferReason};
use crate::{AppError, Result};

use super::db::Database;
use super::{format_timestamp, parse_timestamp};

/// Repository wrapper around `SQLite` for queued sessions.
#[derive(Clone)]
pub struct QueueRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    session_id: String,
    reason: String,
    priority: String,
    from_agent_id: Option<String>,
    exclude_agent_id: Option<String>,
    summary: Option<String>,
    confidence: Option<f64>,
    escalated: i64,
    queued_at: String,
    attempts: i64,
}

impl QueueRow {
    fn into_entry(self) -> Result<QueueEntry> {
        Ok(QueueEntry {
            reason: TransferReason::parse(&self.reason)
                .ok_or_else(|| AppError::Db(format!("invalid queue reason: {}", self.reason)))?,
            priority: TransferPriority::parse(&self.priority).ok_or_else(|| {
                AppError::Db(format!("invalid queue priority: {}", self.priority))
            })?,
            queued_at: parse_timestamp("queued_at", &self.queued_at)?,
            attempts: u32::try_from(self.attempts)
                .map_err(|e| AppError::Db(format!("invalid attempts: {e}")))?,
            escalated: self.escalated != 0,
            session_id: self.session_id,
            from_agent_id: self.from_agent_id,
            exclude_agent_id: self.exclude_agent_id,
            summary: self.summary,
            confidence: self.confidence,
        })
    }
}

const ORDERED: &str = "SELECT session_id, reason, priority, from_agent_id, exclude_agent_id,
     summary, confidence, escalated, queued_at, attempts
     FROM handoff_queue ORDER BY priority_rank DESC, queued_at ASC";

impl QueueRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Queue a session, or refresh an existing entry.
    ///
    /// A re-queued session keeps its original `queued_at`; priority and the
    /// escalation flag only ever ratchet upwards.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn enqueue(&self, entry: &QueueEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO handoff_queue (session_id, reason, priority, priority_rank, from_agent_id,
             exclude_agent_id, summary, confidence, escalated, queued_at, attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(session_id) DO UPDATE SET
                reason = excluded.reason,
                priority = CASE WHEN excluded.priority_rank > handoff_queue.priority_rank
                                THEN excluded.priority ELSE handoff_queue.priority END,
                priority_rank = MAX(excluded.priority_rank, handoff_queue.priority_rank),
                from_agent_id = excluded.from_agent_id,
                exclude_agent_id = excluded.exclude_agent_id,
                summary = COALESCE(excluded.summary, handoff_queue.summary),
                confidence = COALESCE(excluded.confidence, handoff_queue.confidence),
                escalated = MAX(excluded.escalated, handoff_queue.escalated)",
        )
        .bind(&entry.session_id)
        .bind(entry.reason.as_str())
        .bind(entry.priority.as_str())
        .bind(entry.priority.rank())
        .bind(&entry.from_agent_id)
        .bind(&entry.exclude_agent_id)
        .bind(&entry.summary)
        .bind(entry.confidence)
        .bind(i64::from(entry.escalated))
        .bind(format_timestamp(entry.queued_at))
        .bind(i64::from(entry.attempts))
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// All queued sessions, most urgent first, then oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_ordered(&self) -> Result<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(ORDERED)
            .fetch_all(self.db.as_ref())
            .await?;

        rows.into_iter().map(QueueRow::into_entry).collect()
    }

    /// 1-based position of a session in the queue order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn position(&self, session_id: &str) -> Result<Option<u32>> {
        let entries = self.list_ordered().await?;
        Ok(entries
            .iter()
            .position(|entry| entry.session_id == session_id)
            .and_then(|idx| u32::try_from(idx + 1).ok()))
    }

    /// Fetch one queued session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, session_id: &str) -> Result<Option<QueueEntry>> {
        let row: Option<QueueRow> = sqlx::query_as(
            "SELECT session_id, reason, priority, from_agent_id, exclude_agent_id,
             summary, confidence, escalated, queued_at, attempts
             FROM handoff_queue WHERE session_id = ?1",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(QueueRow::into_entry).transpose()
    }

    /// Count a failed reconciliation attempt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_attempt(&self, session_id: &str) -> Result<()> {
        sqlx::query("UPDATE handoff_queue SET attempts = attempts + 1 WHERE session_id = ?1")
            .bind(session_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Drop a session from the queue. Returns whether an entry existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn remove(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM handoff_queue WHERE session_id = ?1")
            .bind(session_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
