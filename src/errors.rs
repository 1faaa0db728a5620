//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Malformed caller input.
    Validation(String),
    /// Unknown session, agent or transfer, or a transfer already resolved.
    NotFound(String),
    /// Lost a race for the last free capacity slot of an agent.
    CapacityExceeded(String),
    /// Delivery traffic from an unauthenticated connection.
    Unauthorized(String),
    /// No agent can take the session right now. Recoverable; surfaced as "queued".
    NoAgentsAvailable(String),
    /// Persistence failure that survived one retry.
    Orchestrator(String),
    /// File-system or socket I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::CapacityExceeded(msg) => write!(f, "capacity exceeded: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::NoAgentsAvailable(msg) => write!(f, "no agents available: {msg}"),
            Self::Orchestrator(msg) => write!(f, "orchestrator: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl AppError {
    /// Stable snake-case error class sent to socket clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Db(_) => "db",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::Unauthorized(_) => "unauthorized",
            Self::NoAgentsAvailable(_) => "no_agents_available",
            Self::Orchestrator(_) => "orchestrator",
            Self::Io(_) => "io",
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
