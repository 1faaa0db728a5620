//! REST routes over the orchestrator.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::agent::{Agent, AgentStatus};
use crate::models::session::ChatSession;
use crate::models::transfer::Transfer;
use crate::orchestrator::presence::StatusOutcome;
use crate::orchestrator::transfer_manager::CompletionOutcome;
use crate::orchestrator::{DeclineOutcome, TransferOutcome, TransferRequest};
use crate::{AppError, Result};

use super::{socket, AppState};

type Shared = State<Arc<AppState>>;

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(socket::ws_handler))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/end", post(end_session))
        .route("/api/sessions/{id}/transfers", get(session_transfers))
        .route("/api/transfers", post(request_transfer))
        .route("/api/transfers/{id}/accept", post(accept_transfer))
        .route("/api/transfers/{id}/decline", post(decline_transfer))
        .route("/api/transfers/{id}/complete", post(complete_transfer))
        .route("/api/transfers/{id}/cancel", post(cancel_transfer))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/{id}/status", put(set_agent_status))
        .route("/api/agents/{id}/transfers/pending", get(pending_transfers))
        .with_state(state)
}

async fn health(State(state): Shared) -> Json<Value> {
    let counts = state.delivery.stats();
    Json(json!({
        "status": "ok",
        "agents_connected": state.delivery.agents().len(),
        "customers_connected": state.delivery.customers().len(),
        "delivered": counts.delivered,
        "dropped": counts.dropped,
    }))
}

#[derive(Deserialize)]
struct NewSession {
    customer_name: String,
    service_type: String,
}

async fn create_session(
    State(state): Shared,
    Json(body): Json<NewSession>,
) -> Result<(StatusCode, Json<ChatSession>)> {
    if body.customer_name.trim().is_empty() || body.service_type.trim().is_empty() {
        return Err(AppError::Validation(
            "customer_name and service_type are required".into(),
        ));
    }
    let session = ChatSession::new(body.customer_name, body.service_type);
    let created = state.sessions.create(&session).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_session(State(state): Shared, Path(id): Path<String>) -> Result<Json<ChatSession>> {
    state
        .sessions
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))
}

async fn end_session(State(state): Shared, Path(id): Path<String>) -> Result<Json<ChatSession>> {
    Ok(Json(state.orchestrator.end_session(&id).await?))
}

async fn session_transfers(
    State(state): Shared,
    Path(id): Path<String>,
) -> Result<Json<Vec<Transfer>>> {
    Ok(Json(state.orchestrator.list_transfers_for_session(&id).await?))
}

async fn request_transfer(
    State(state): Shared,
    Json(body): Json<TransferRequest>,
) -> Result<Json<TransferOutcome>> {
    Ok(Json(state.orchestrator.request_transfer(body).await?))
}

#[derive(Deserialize)]
struct AcceptBody {
    agent_id: String,
    #[serde(default)]
    message: Option<String>,
}

async fn accept_transfer(
    State(state): Shared,
    Path(id): Path<String>,
    Json(body): Json<AcceptBody>,
) -> Result<Json<Transfer>> {
    let accepted = state
        .orchestrator
        .accept_transfer(&id, &body.agent_id, body.message.as_deref())
        .await?;
    Ok(Json(accepted))
}

#[derive(Deserialize)]
struct DeclineBody {
    agent_id: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn decline_transfer(
    State(state): Shared,
    Path(id): Path<String>,
    Json(body): Json<DeclineBody>,
) -> Result<Json<DeclineOutcome>> {
    let outcome = state
        .orchestrator
        .decline_transfer(&id, &body.agent_id, body.reason.as_deref())
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct CompleteBody {
    success: bool,
}

async fn complete_transfer(
    State(state): Shared,
    Path(id): Path<String>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<CompletionOutcome>> {
    Ok(Json(
        state.orchestrator.complete_transfer(&id, body.success).await?,
    ))
}

#[derive(Deserialize)]
struct CancelBody {
    #[serde(default)]
    reason: Option<String>,
}

async fn cancel_transfer(
    State(state): Shared,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Transfer>> {
    // The body is optional; an empty one cancels with the default note.
    let reason = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<CancelBody>(&body)
            .map_err(|err| AppError::Validation(format!("invalid cancel body: {err}")))?
            .reason
    };
    Ok(Json(
        state
            .orchestrator
            .cancel_transfer(&id, reason.as_deref())
            .await?,
    ))
}

async fn list_agents(State(state): Shared) -> Json<Vec<Agent>> {
    Json(state.orchestrator.directory().snapshot().await)
}

#[derive(Deserialize)]
struct StatusBody {
    status: AgentStatus,
}

async fn set_agent_status(
    State(state): Shared,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<Json<StatusOutcome>> {
    Ok(Json(
        state.orchestrator.set_agent_status(&id, body.status).await?,
    ))
}

async fn pending_transfers(
    State(state): Shared,
    Path(id): Path<String>,
) -> Result<Json<Vec<Transfer>>> {
    Ok(Json(state.orchestrator.get_pending_transfers(&id).await?))
}
