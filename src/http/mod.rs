//! HTTP API and WebSocket transport.

pub mod routes;
pub mod socket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::delivery::auth::Authenticator;
use crate::delivery::{DeliveryHub, TransferNotifier};
use crate::directory::AgentDirectory;
use crate::orchestrator::TransferOrchestrator;
use crate::persistence::agent_repo::AgentRepo;
use crate::persistence::db::Database;
use crate::persistence::queue_repo::QueueRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::transfer_repo::TransferRepo;
use crate::store::{AgentStore, SessionStore};
use crate::{AppError, GlobalConfig, Result};

/// Shared state handed to every request handler.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Handoff state machine.
    pub orchestrator: Arc<TransferOrchestrator>,
    /// Live connection registries.
    pub delivery: Arc<DeliveryHub>,
    /// Session persistence, for session creation and reads.
    pub sessions: SessionRepo,
    /// Socket admission.
    pub auth: Authenticator,
}

impl AppState {
    /// Wire repositories, directory, delivery hub and orchestrator over `db`.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, db: Arc<Database>) -> Self {
        let sessions = SessionRepo::new(Arc::clone(&db));
        let session_store: Arc<dyn SessionStore> = Arc::new(sessions.clone());
        let agent_store: Arc<dyn AgentStore> = Arc::new(AgentRepo::new(Arc::clone(&db)));

        let directory = Arc::new(AgentDirectory::new(agent_store));
        let delivery = Arc::new(DeliveryHub::new(Arc::clone(&session_store)));
        let notifier: Arc<dyn TransferNotifier> = Arc::clone(&delivery) as Arc<dyn TransferNotifier>;
        let orchestrator = Arc::new(TransferOrchestrator::new(
            directory,
            Arc::clone(&session_store),
            TransferRepo::new(Arc::clone(&db)),
            QueueRepo::new(db),
            notifier,
            config.handoff.clone(),
        ));
        let auth = Authenticator::new(&config.agents, session_store);

        Self {
            config,
            orchestrator,
            delivery,
            sessions,
            auth,
        }
    }

    /// Load the roster, apply the configured seeds and recover offers
    /// orphaned by a previous run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Orchestrator` if persistence stays unreachable.
    pub async fn bootstrap(&self) -> Result<()> {
        let directory = self.orchestrator.directory();
        directory.load().await?;
        for seed in &self.config.agents {
            directory.register(seed.to_agent()).await?;
        }
        let recovered = self.orchestrator.recover_on_startup().await?;
        info!(
            agents = self.config.agents.len(),
            recovered, "handoff state bootstrapped"
        );
        Ok(())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::CapacityExceeded(_) => StatusCode::CONFLICT,
            Self::NoAgentsAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Db(_) | Self::Orchestrator(_) | Self::Io(_) => {
                error!(err = %self, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Serve the API on an already bound listener until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve_http(
    state: Arc<AppState>,
    listener: TcpListener,
    ct: CancellationToken,
) -> Result<()> {
    let router = routes::router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("HTTP server error: {err}")))?;

    info!("HTTP transport shut down");
    Ok(())
}

/// Bind `config.http_host:http_port` and serve until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or cannot be bound.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind: SocketAddr = state
        .config
        .bind_address()
        .parse()
        .map_err(|err| AppError::Config(format!("invalid bind address: {err}")))?;
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {bind}: {err}")))?;

    info!(%bind, "starting HTTP/WebSocket transport");
    serve_http(state, listener, ct).await
}
