//! Global configuration parsing and validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::agent::{Agent, Skill};
use crate::{AppError, Result};

/// Tuning knobs for the handoff state machine and its background passes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HandoffConfig {
    /// Maximum automatic reroutes per handoff chain before escalating.
    #[serde(default = "default_max_reroutes")]
    pub max_reroutes: u32,
    /// Age after which a pending transfer is swept to `failed`.
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_seconds: u64,
    /// Interval between stale-transfer sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Interval between queue reconciliation passes.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_seconds: u64,
    /// Number of trailing conversation messages captured in a transfer snapshot.
    #[serde(default = "default_context_message_count")]
    pub context_message_count: usize,
    /// Estimated wait contributed by each queue position.
    #[serde(default = "default_queued_wait")]
    pub queued_wait_seconds: u64,
    /// Whether a closed agent socket marks the agent offline.
    #[serde(default = "default_true")]
    pub offline_on_disconnect: bool,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            max_reroutes: default_max_reroutes(),
            pending_timeout_seconds: default_pending_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            reconcile_interval_seconds: default_reconcile_interval(),
            context_message_count: default_context_message_count(),
            queued_wait_seconds: default_queued_wait(),
            offline_on_disconnect: true,
        }
    }
}

impl HandoffConfig {
    /// Pending-transfer timeout as a [`Duration`].
    #[must_use]
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_seconds)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Reconcile interval as a [`Duration`].
    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }
}

/// Seed entry for the agent roster.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentSeed {
    /// Stable agent identifier.
    pub id: String,
    /// Name shown to customers.
    pub display_name: String,
    /// Lowercase hex SHA-256 digest of the agent's socket credential.
    pub credential_sha256: String,
    /// Concurrent chat capacity.
    #[serde(default = "default_max_concurrent_chats")]
    pub max_concurrent_chats: u32,
    /// Services this agent can handle.
    #[serde(default)]
    pub skills: Vec<Skill>,
}

impl AgentSeed {
    /// Offline directory record for this seed.
    #[must_use]
    pub fn to_agent(&self) -> Agent {
        Agent::new(
            self.id.clone(),
            self.display_name.clone(),
            self.max_concurrent_chats,
            self.skills.clone(),
        )
    }
}

fn default_true() -> bool {
    true
}

fn default_max_reroutes() -> u32 {
    3
}

fn default_pending_timeout() -> u64 {
    120
}

fn default_sweep_interval() -> u64 {
    15
}

fn default_reconcile_interval() -> u64 {
    10
}

fn default_context_message_count() -> usize {
    10
}

fn default_queued_wait() -> u64 {
    120
}

fn default_max_concurrent_chats() -> u32 {
    3
}

fn default_http_host() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    3000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/handoff-desk.db")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Interface the HTTP/WebSocket listener binds to.
    #[serde(default = "default_http_host")]
    pub http_host: String,
    /// HTTP port for the API and WebSocket transport.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Handoff state machine settings.
    #[serde(default)]
    pub handoff: HandoffConfig,
    /// Agent roster seeded into the directory at startup.
    #[serde(default)]
    pub agents: Vec<AgentSeed>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address string for the HTTP listener.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    fn validate(&mut self) -> Result<()> {
        if self.handoff.sweep_interval_seconds == 0 || self.handoff.reconcile_interval_seconds == 0
        {
            return Err(AppError::Config(
                "sweep and reconcile intervals must be greater than zero".into(),
            ));
        }

        if self.handoff.pending_timeout_seconds == 0 {
            return Err(AppError::Config(
                "pending_timeout_seconds must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for seed in &mut self.agents {
            if seed.id.trim().is_empty() {
                return Err(AppError::Config("agent id must not be empty".into()));
            }
            if !seen.insert(seed.id.clone()) {
                return Err(AppError::Config(format!("duplicate agent id {}", seed.id)));
            }
            if seed.max_concurrent_chats == 0 {
                return Err(AppError::Config(format!(
                    "agent {} max_concurrent_chats must be greater than zero",
                    seed.id
                )));
            }
            if let Some(skill) = seed
                .skills
                .iter()
                .find(|skill| !(1..=5).contains(&skill.proficiency))
            {
                return Err(AppError::Config(format!(
                    "agent {} skill {} proficiency must be within 1..=5",
                    seed.id, skill.service
                )));
            }
            seed.credential_sha256 = seed.credential_sha256.to_ascii_lowercase();
            if seed.credential_sha256.len() != 64
                || !seed
                    .credential_sha256
                    .chars()
                    .all(|c| c.is_ascii_hexdigit())
            {
                return Err(AppError::Config(format!(
                    "agent {} credential_sha256 must be a 64-digit hex digest",
                    seed.id
                )));
            }
        }

        Ok(())
    }
}
