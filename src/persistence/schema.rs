//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so this can
//! run on every server startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS agent (
    seq                  INTEGER PRIMARY KEY AUTOINCREMENT,
    id                   TEXT NOT NULL UNIQUE,
    display_name         TEXT NOT NULL,
    status               TEXT NOT NULL CHECK(status IN ('online','offline','busy','away','break')),
    max_concurrent_chats INTEGER NOT NULL CHECK(max_concurrent_chats > 0),
    current_chat_count   INTEGER NOT NULL DEFAULT 0 CHECK(current_chat_count >= 0),
    skills               TEXT NOT NULL,
    avg_response_seconds REAL NOT NULL,
    avg_satisfaction     REAL NOT NULL,
    active_sessions      TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    CHECK(current_chat_count <= max_concurrent_chats)
);

CREATE TABLE IF NOT EXISTS chat_session (
    id                TEXT PRIMARY KEY NOT NULL,
    customer_name     TEXT NOT NULL,
    service_type      TEXT NOT NULL,
    assigned_agent_id TEXT,
    stage             TEXT NOT NULL CHECK(stage IN ('collecting_details','ai_handling','human_agent','ai_fallback','completed')),
    escalated         INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_message (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    session_id TEXT NOT NULL,
    role       TEXT NOT NULL CHECK(role IN ('customer','assistant','agent','system')),
    content    TEXT NOT NULL,
    metadata   TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS transfer (
    id                 TEXT PRIMARY KEY NOT NULL,
    session_id         TEXT NOT NULL,
    from_type          TEXT NOT NULL CHECK(from_type IN ('ai','agent')),
    from_agent_id      TEXT,
    to_agent_id        TEXT NOT NULL,
    reason             TEXT NOT NULL CHECK(reason IN ('customer_request','ai_escalation','complexity_escalation','skill_mismatch','technical_issue','agent_unavailable','workload_balance','emergency')),
    priority           TEXT NOT NULL CHECK(priority IN ('low','medium','high','urgent')),
    status             TEXT NOT NULL CHECK(status IN ('pending','accepted','declined','completed','failed')),
    trigger_kind       TEXT NOT NULL CHECK(trigger_kind IN ('manual','automatic')),
    context            TEXT NOT NULL,
    reroute_count      INTEGER NOT NULL DEFAULT 0,
    parent_transfer_id TEXT,
    resolution_note    TEXT,
    success            INTEGER,
    requested_at       TEXT NOT NULL,
    responded_at       TEXT,
    completed_at       TEXT
);

CREATE TABLE IF NOT EXISTS handoff_queue (
    session_id       TEXT PRIMARY KEY NOT NULL,
    reason           TEXT NOT NULL,
    priority         TEXT NOT NULL,
    priority_rank    INTEGER NOT NULL,
    from_agent_id    TEXT,
    exclude_agent_id TEXT,
    summary          TEXT,
    confidence       REAL,
    escalated        INTEGER NOT NULL DEFAULT 0,
    queued_at        TEXT NOT NULL,
    attempts         INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_message_session ON chat_message(session_id, seq);
CREATE INDEX IF NOT EXISTS idx_transfer_session ON transfer(session_id);
CREATE INDEX IF NOT EXISTS idx_transfer_agent_status ON transfer(to_agent_id, status);
CREATE UNIQUE INDEX IF NOT EXISTS uniq_transfer_pending_session
    ON transfer(session_id) WHERE status = 'pending';
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
