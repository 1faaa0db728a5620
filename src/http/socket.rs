//! WebSocket endpoint for agents and customers.
//!
//! The first frame must be `authenticate`; anything else before that is
//! answered with an `unauthorized` error frame. Once admitted, the
//! connection is registered with the delivery hub until it closes.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::delivery::auth::Identity;
use crate::delivery::protocol::{ClientFrame, ServerFrame, UserType};
use crate::delivery::registry::FrameSender;
use crate::models::agent::AgentStatus;
use crate::{AppError, Result};

use super::AppState;

/// Upgrade `GET /ws` to a delivery socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state).instrument(info_span!("ws")))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let payload = match serde_json::to_string(&frame) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(%err, "failed to encode frame");
                    continue;
                }
            };
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let mut admitted: Option<(Identity, u64)> = None;
    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(err) => {
                let _ = tx.send(ServerFrame::error("validation", format!("malformed frame: {err}")));
                continue;
            }
        };

        if let ClientFrame::Authenticate(payload) = frame {
            if admitted.is_some() {
                let _ = tx.send(ServerFrame::error("validation", "connection already authenticated"));
                continue;
            }
            match state.auth.authenticate(&payload).await {
                Ok(identity) => {
                    let (registry, user_type, key) = match &identity {
                        Identity::Agent(id) => (state.delivery.agents(), UserType::Agent, id),
                        Identity::Customer(id) => (state.delivery.customers(), UserType::Customer, id),
                    };
                    let conn_id = registry.register(key, tx.clone());
                    info!(id = %key, user_type = ?user_type, "connection admitted");
                    let _ = tx.send(ServerFrame::Authenticated {
                        user_type,
                        id: key.clone(),
                    });
                    admitted = Some((identity, conn_id));
                }
                Err(err) => {
                    let _ = tx.send(ServerFrame::error(err.code(), err.to_string()));
                }
            }
            continue;
        }

        let Some((identity, _)) = &admitted else {
            let _ = tx.send(ServerFrame::error(
                "unauthorized",
                "authenticate before sending other frames",
            ));
            continue;
        };
        if let Err(err) = dispatch(&state, identity, frame, &tx).await {
            debug!(%err, "socket request rejected");
            let _ = tx.send(ServerFrame::error(err.code(), err.to_string()));
        }
    }

    if let Some((identity, conn_id)) = admitted {
        disconnect(&state, &identity, conn_id).await;
    }
    send_task.abort();
}

async fn dispatch(
    state: &AppState,
    identity: &Identity,
    frame: ClientFrame,
    tx: &FrameSender,
) -> Result<()> {
    match (identity, frame) {
        (_, ClientFrame::Heartbeat) => {
            let _ = tx.send(ServerFrame::HeartbeatResponse {
                timestamp: Utc::now(),
            });
        }
        (Identity::Agent(agent_id), ClientFrame::AgentMessage(payload)) => {
            let session_id = payload
                .session_id
                .ok_or_else(|| AppError::Validation("agent_message requires sessionId".into()))?;
            state
                .delivery
                .agent_message(agent_id, &session_id, &payload.message)
                .await?;
        }
        (Identity::Customer(session_id), ClientFrame::CustomerMessage(payload)) => {
            own_session(session_id, payload.session_id.as_deref())?;
            state
                .delivery
                .customer_message(session_id, &payload.message)
                .await?;
        }
        (Identity::Agent(_), ClientFrame::Typing(payload)) => {
            let session_id = payload
                .session_id
                .ok_or_else(|| AppError::Validation("typing requires sessionId".into()))?;
            state
                .delivery
                .typing(UserType::Agent, &session_id, payload.is_typing)
                .await;
        }
        (Identity::Customer(session_id), ClientFrame::Typing(payload)) => {
            own_session(session_id, payload.session_id.as_deref())?;
            state
                .delivery
                .typing(UserType::Customer, session_id, payload.is_typing)
                .await;
        }
        (Identity::Agent(agent_id), ClientFrame::StatusUpdate(payload)) => {
            state
                .orchestrator
                .set_agent_status(agent_id, payload.status)
                .await?;
        }
        (_, ClientFrame::Authenticate(_)) => {
            return Err(AppError::Validation("connection already authenticated".into()));
        }
        (Identity::Agent(_), ClientFrame::CustomerMessage(_))
        | (Identity::Customer(_), ClientFrame::AgentMessage(_) | ClientFrame::StatusUpdate(_)) => {
            return Err(AppError::Unauthorized(
                "frame not permitted for this connection".into(),
            ));
        }
    }
    Ok(())
}

fn own_session(session_id: &str, claimed: Option<&str>) -> Result<()> {
    match claimed {
        Some(claimed) if claimed != session_id => Err(AppError::Unauthorized(format!(
            "connection is bound to session {session_id}"
        ))),
        _ => Ok(()),
    }
}

async fn disconnect(state: &AppState, identity: &Identity, conn_id: u64) {
    match identity {
        Identity::Agent(agent_id) => {
            if !state.delivery.agents().remove(agent_id, conn_id) {
                return;
            }
            info!(agent_id, "agent disconnected");
            if state.config.handoff.offline_on_disconnect {
                if let Err(err) = state
                    .orchestrator
                    .set_agent_status(agent_id, AgentStatus::Offline)
                    .await
                {
                    warn!(agent_id, %err, "failed to mark disconnected agent offline");
                }
            }
        }
        Identity::Customer(session_id) => {
            if state.delivery.customers().remove(session_id, conn_id) {
                info!(session_id, "customer disconnected");
            }
        }
    }
}
