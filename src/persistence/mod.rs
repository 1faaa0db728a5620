//! Persistence layer modules.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{AppError, Result};

pub mod agent_repo;
pub mod db;
pub mod queue_repo;
pub mod retry;
pub mod schema;
pub mod session_repo;
pub mod transfer_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

/// Format a timestamp for storage.
///
/// Fixed microsecond precision keeps the text lexicographically ordered.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 column value.
pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

/// Parse a nullable RFC 3339 column value.
pub(crate) fn parse_optional_timestamp(
    column: &str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_timestamp(column, s)).transpose()
}
