//! Human agent model with capacity and ranking helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence status reported by an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Signed in and accepting chats.
    Online,
    /// Signed out.
    Offline,
    /// Signed in but not accepting new chats.
    Busy,
    /// Temporarily away from the desk.
    Away,
    /// On a scheduled break.
    Break,
}

impl AgentStatus {
    /// Stable lowercase label used in storage and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Busy => "busy",
            Self::Away => "away",
            Self::Break => "break",
        }
    }

    /// Parse a stored label.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "busy" => Some(Self::Busy),
            "away" => Some(Self::Away),
            "break" => Some(Self::Break),
            _ => None,
        }
    }
}

/// Service competence of an agent, proficiency on a 1..=5 scale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Skill {
    /// Service type this skill covers (e.g. `web_development`).
    pub service: String,
    /// Proficiency, 1 (basic) to 5 (expert).
    pub proficiency: u8,
}

/// Metadata kept for every chat an agent currently holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionMeta {
    /// Held session.
    pub session_id: String,
    /// Customer display name.
    pub customer_name: String,
    /// Service the session concerns.
    pub service_type: String,
    /// Transfer that put the session on this agent, if any.
    pub transfer_id: Option<String>,
    /// When the agent took the chat.
    pub assigned_at: DateTime<Utc>,
}

/// Response time assumed for agents with no history yet.
pub const DEFAULT_RESPONSE_SECONDS: f64 = 30.0;

const RESPONSE_EMA_WEIGHT: f64 = 0.2;

/// Human agent tracked by the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Agent {
    /// Unique agent identifier.
    pub id: String,
    /// Name shown to customers.
    pub display_name: String,
    /// Presence status.
    pub status: AgentStatus,
    /// Concurrent chat capacity.
    pub max_concurrent_chats: u32,
    /// Chats currently held; always equals `active_sessions.len()`.
    pub current_chat_count: u32,
    /// Services this agent covers.
    pub skills: Vec<Skill>,
    /// Rolling average time to answer a transfer.
    pub avg_response_seconds: f64,
    /// Average customer satisfaction, 0.0 to 5.0.
    pub avg_satisfaction: f64,
    /// Chats currently held.
    pub active_sessions: Vec<SessionMeta>,
    /// Transfers offered to this agent and not yet answered. Runtime only.
    #[serde(default)]
    pub pending_offers: Vec<String>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Construct an offline agent with no load.
    #[must_use]
    pub fn new(id: String, display_name: String, max_concurrent_chats: u32, skills: Vec<Skill>) -> Self {
        Self {
            id,
            display_name,
            status: AgentStatus::Offline,
            max_concurrent_chats,
            current_chat_count: 0,
            skills,
            avg_response_seconds: DEFAULT_RESPONSE_SECONDS,
            avg_satisfaction: 0.0,
            active_sessions: Vec::new(),
            pending_offers: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Available means online; capacity is checked separately.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Online
    }

    /// Slots consumed by held chats plus outstanding offers.
    #[must_use]
    pub fn committed_load(&self) -> u32 {
        self.current_chat_count
            .saturating_add(u32::try_from(self.pending_offers.len()).unwrap_or(u32::MAX))
    }

    /// Whether one more offer or chat fits.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.committed_load() < self.max_concurrent_chats
    }

    /// Committed load divided by capacity.
    #[must_use]
    pub fn workload_ratio(&self) -> f64 {
        if self.max_concurrent_chats == 0 {
            return 1.0;
        }
        f64::from(self.committed_load()) / f64::from(self.max_concurrent_chats)
    }

    /// Proficiency for `service_type`, or 0 when the agent lacks the skill.
    #[must_use]
    pub fn skill_match(&self, service_type: &str) -> u8 {
        self.skills
            .iter()
            .filter(|skill| skill.service.eq_ignore_ascii_case(service_type))
            .map(|skill| skill.proficiency)
            .max()
            .unwrap_or(0)
    }

    /// Expected seconds until this agent answers a new transfer.
    #[must_use]
    pub fn estimated_wait_seconds(&self) -> u64 {
        let scaled = self.avg_response_seconds.max(0.0) * (1.0 + self.workload_ratio());
        // Saturating float-to-int cast; the value is non-negative.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let secs = scaled.round() as u64;
        secs
    }

    /// Fold one observed response time into the rolling average.
    pub fn record_response(&mut self, seconds: f64) {
        let seconds = seconds.max(0.0);
        self.avg_response_seconds =
            self.avg_response_seconds * (1.0 - RESPONSE_EMA_WEIGHT) + seconds * RESPONSE_EMA_WEIGHT;
    }

    /// Whether `session_id` is among the chats this agent holds.
    #[must_use]
    pub fn holds_session(&self, session_id: &str) -> bool {
        self.active_sessions
            .iter()
            .any(|meta| meta.session_id == session_id)
    }
}
