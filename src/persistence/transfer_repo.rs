//! Transfer repository for `SQLite` persistence.
//!
//! Transfers are append-only: rows are inserted once and afterwards only
//! their status columns move forward. Every status change is a
//! compare-and-set on the expected current status, so two callers racing
//! to resolve the same transfer cannot both win.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::transfer::{
    Transfer, TransferContext, TransferPriority, TransferReason, TransferSource, TransferStatus,
    TransferTrigger,
};
use crate::{AppError, Result};

use super::db::Database;
use super::{format_timestamp, parse_optional_timestamp, parse_timestamp};

/// Repository wrapper around `SQLite` for transfer records.
#[derive(Clone)]
pub struct TransferRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct TransferRow {
    id: String,
    session_id: String,
    from_type: String,
    from_agent_id: Option<String>,
    to_agent_id: String,
    reason: String,
    priority: String,
    status: String,
    trigger_kind: String,
    context: String,
    reroute_count: i64,
    parent_transfer_id: Option<String>,
    resolution_note: Option<String>,
    success: Option<i64>,
    requested_at: String,
    responded_at: Option<String>,
    completed_at: Option<String>,
}

fn invalid(column: &str, value: &str) -> AppError {
    AppError::Db(format!("invalid {column}: {value}"))
}

impl TransferRow {
    fn into_transfer(self) -> Result<Transfer> {
        let context: TransferContext = serde_json::from_str(&self.context)
            .map_err(|e| AppError::Db(format!("invalid transfer context: {e}")))?;

        Ok(Transfer {
            from_type: TransferSource::parse(&self.from_type)
                .ok_or_else(|| invalid("from_type", &self.from_type))?,
            reason: TransferReason::parse(&self.reason)
                .ok_or_else(|| invalid("reason", &self.reason))?,
            priority: TransferPriority::parse(&self.priority)
                .ok_or_else(|| invalid("priority", &self.priority))?,
            status: TransferStatus::parse(&self.status)
                .ok_or_else(|| invalid("status", &self.status))?,
            trigger: TransferTrigger::parse(&self.trigger_kind)
                .ok_or_else(|| invalid("trigger_kind", &self.trigger_kind))?,
            reroute_count: u32::try_from(self.reroute_count)
                .map_err(|e| AppError::Db(format!("invalid reroute_count: {e}")))?,
            requested_at: parse_timestamp("requested_at", &self.requested_at)?,
            responded_at: parse_optional_timestamp("responded_at", self.responded_at.as_deref())?,
            completed_at: parse_optional_timestamp("completed_at", self.completed_at.as_deref())?,
            success: self.success.map(|v| v != 0),
            id: self.id,
            session_id: self.session_id,
            from_agent_id: self.from_agent_id,
            to_agent_id: self.to_agent_id,
            context,
            parent_transfer_id: self.parent_transfer_id,
            resolution_note: self.resolution_note,
        })
    }
}

impl TransferRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new transfer record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the session already has a pending
    /// transfer, or `AppError::Db` if the insert fails.
    pub async fn create(&self, transfer: &Transfer) -> Result<Transfer> {
        let context = serde_json::to_string(&transfer.context)
            .map_err(|e| AppError::Db(format!("failed to encode transfer context: {e}")))?;

        let outcome = sqlx::query(
            "INSERT INTO transfer (id, session_id, from_type, from_agent_id, to_agent_id, reason,
             priority, status, trigger_kind, context, reroute_count, parent_transfer_id,
             resolution_note, success, requested_at, responded_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )
        .bind(&transfer.id)
        .bind(&transfer.session_id)
        .bind(transfer.from_type.as_str())
        .bind(&transfer.from_agent_id)
        .bind(&transfer.to_agent_id)
        .bind(transfer.reason.as_str())
        .bind(transfer.priority.as_str())
        .bind(transfer.status.as_str())
        .bind(transfer.trigger.as_str())
        .bind(&context)
        .bind(i64::from(transfer.reroute_count))
        .bind(&transfer.parent_transfer_id)
        .bind(&transfer.resolution_note)
        .bind(transfer.success.map(i64::from))
        .bind(format_timestamp(transfer.requested_at))
        .bind(transfer.responded_at.map(format_timestamp))
        .bind(transfer.completed_at.map(format_timestamp))
        .execute(self.db.as_ref())
        .await;

        match outcome {
            Ok(_) => Ok(transfer.clone()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AppError::Validation(format!(
                    "session {} already has a pending transfer",
                    transfer.session_id
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Retrieve a transfer by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Transfer>> {
        let row: Option<TransferRow> = sqlx::query_as("SELECT * FROM transfer WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(TransferRow::into_transfer).transpose()
    }

    /// The pending transfer for a session, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_pending_for_session(&self, session_id: &str) -> Result<Option<Transfer>> {
        self.fetch_one_for_session(session_id, TransferStatus::Pending)
            .await
    }

    /// The most recent accepted (not yet completed) transfer for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_accepted_for_session(&self, session_id: &str) -> Result<Option<Transfer>> {
        self.fetch_one_for_session(session_id, TransferStatus::Accepted)
            .await
    }

    async fn fetch_one_for_session(
        &self,
        session_id: &str,
        status: TransferStatus,
    ) -> Result<Option<Transfer>> {
        let row: Option<TransferRow> = sqlx::query_as(
            "SELECT * FROM transfer WHERE session_id = ?1 AND status = ?2
             ORDER BY requested_at DESC LIMIT 1",
        )
        .bind(session_id)
        .bind(status.as_str())
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(TransferRow::into_transfer).transpose()
    }

    /// Pending transfers offered to an agent, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_pending_for_agent(&self, agent_id: &str) -> Result<Vec<Transfer>> {
        let rows: Vec<TransferRow> = sqlx::query_as(
            "SELECT * FROM transfer WHERE to_agent_id = ?1 AND status = 'pending'
             ORDER BY requested_at ASC",
        )
        .bind(agent_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TransferRow::into_transfer).collect()
    }

    /// Full transfer history for a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Transfer>> {
        let rows: Vec<TransferRow> = sqlx::query_as(
            "SELECT * FROM transfer WHERE session_id = ?1 ORDER BY requested_at ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TransferRow::into_transfer).collect()
    }

    /// Every pending transfer requested before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transfer>> {
        let rows: Vec<TransferRow> = sqlx::query_as(
            "SELECT * FROM transfer WHERE status = 'pending' AND requested_at < ?1
             ORDER BY requested_at ASC",
        )
        .bind(format_timestamp(cutoff))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TransferRow::into_transfer).collect()
    }

    /// Every pending transfer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_pending(&self) -> Result<Vec<Transfer>> {
        let rows: Vec<TransferRow> =
            sqlx::query_as("SELECT * FROM transfer WHERE status = 'pending'")
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(TransferRow::into_transfer).collect()
    }

    /// Move a pending transfer to `accepted`.
    ///
    /// Returns `Ok(None)` when the transfer was no longer pending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_accepted(&self, id: &str) -> Result<Option<Transfer>> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            "UPDATE transfer SET status = 'accepted', responded_at = ?1
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(&now)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        self.reload_if_changed(id, result.rows_affected()).await
    }

    /// Move a pending transfer to `declined` or `failed`, recording a note.
    ///
    /// Returns `Ok(None)` when the transfer was no longer pending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for non-terminal targets and
    /// `AppError::Db` if the update fails.
    pub async fn resolve_pending(
        &self,
        id: &str,
        status: TransferStatus,
        note: Option<&str>,
    ) -> Result<Option<Transfer>> {
        if !matches!(status, TransferStatus::Declined | TransferStatus::Failed) {
            return Err(AppError::Validation(format!(
                "pending transfer cannot be resolved as {}",
                status.as_str()
            )));
        }

        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            "UPDATE transfer SET status = ?1, responded_at = ?2, resolution_note = ?3
             WHERE id = ?4 AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(&now)
        .bind(note)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        self.reload_if_changed(id, result.rows_affected()).await
    }

    /// Move an accepted transfer to `completed`.
    ///
    /// Returns `Ok(None)` when the transfer was not in `accepted`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_completed(&self, id: &str, success: bool) -> Result<Option<Transfer>> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            "UPDATE transfer SET status = 'completed', completed_at = ?1, success = ?2
             WHERE id = ?3 AND status = 'accepted'",
        )
        .bind(&now)
        .bind(i64::from(success))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        self.reload_if_changed(id, result.rows_affected()).await
    }

    async fn reload_if_changed(&self, id: &str, rows_affected: u64) -> Result<Option<Transfer>> {
        if rows_affected == 0 {
            return Ok(None);
        }
        self.get_by_id(id).await
    }
}
