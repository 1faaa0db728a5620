//! Connection admission for agents and customers.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::AgentSeed;
use crate::models::session::SessionStage;
use crate::persistence::retry::retry_once;
use crate::store::SessionStore;
use crate::{AppError, Result};

use super::protocol::{AuthPayload, UserType};

/// Who a connection was admitted as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Agent with the given id.
    Agent(String),
    /// Customer attached to the given session.
    Customer(String),
}

/// Checks `authenticate` frames.
pub struct Authenticator {
    digests: HashMap<String, String>,
    sessions: Arc<dyn SessionStore>,
}

impl Authenticator {
    /// Build from the configured agent roster.
    #[must_use]
    pub fn new(seeds: &[AgentSeed], sessions: Arc<dyn SessionStore>) -> Self {
        let digests = seeds
            .iter()
            .map(|seed| (seed.id.clone(), seed.credential_sha256.to_ascii_lowercase()))
            .collect();
        Self { digests, sessions }
    }

    /// Admit or reject a connection.
    ///
    /// Agents must present a credential whose SHA-256 matches their
    /// configured digest. Customers must name an existing session that is
    /// not completed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` on any mismatch, or
    /// `AppError::Orchestrator` if the session lookup keeps failing.
    pub async fn authenticate(&self, payload: &AuthPayload) -> Result<Identity> {
        match payload.user_type {
            UserType::Agent => {
                let (Some(agent_id), Some(credential)) = (&payload.agent_id, &payload.credential)
                else {
                    return Err(AppError::Unauthorized(
                        "agent authentication requires agentId and credential".into(),
                    ));
                };
                let expected = self.digests.get(agent_id);
                if expected.is_some_and(|digest| *digest == sha256_hex(credential.as_bytes())) {
                    Ok(Identity::Agent(agent_id.clone()))
                } else {
                    warn!(agent_id, "agent credential rejected");
                    Err(AppError::Unauthorized(format!(
                        "invalid credential for agent {agent_id}"
                    )))
                }
            }
            UserType::Customer => {
                let Some(session_id) = &payload.session_id else {
                    return Err(AppError::Unauthorized(
                        "customer authentication requires sessionId".into(),
                    ));
                };
                let session =
                    retry_once("find_session", || self.sessions.find_session(session_id)).await?;
                match session {
                    Some(session) if session.stage != SessionStage::Completed => {
                        Ok(Identity::Customer(session.id))
                    }
                    _ => Err(AppError::Unauthorized(format!(
                        "session {session_id} is not open"
                    ))),
                }
            }
        }
    }
}

/// Lowercase hex SHA-256 digest of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
