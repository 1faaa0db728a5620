use std::sync::Arc;

use handoff_desk::models::message::MessageRole;
use handoff_desk::models::session::{ChatSession, SessionStage};
use handoff_desk::persistence::db;
use handoff_desk::persistence::session_repo::SessionRepo;
use handoff_desk::AppError;
use serde_json::json;

async fn repo() -> SessionRepo {
    let database = db::connect_memory().await.expect("db connect");
    SessionRepo::new(Arc::new(database))
}

#[tokio::test]
async fn create_and_reload_session() {
    let repo = repo().await;
    let session = ChatSession::new("Ana".into(), "hosting".into());
    repo.create(&session).await.expect("create");

    let loaded = repo
        .get_by_id(&session.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(loaded.customer_name, "Ana");
    assert_eq!(loaded.stage, SessionStage::CollectingDetails);
    assert!(!loaded.escalated);
    assert!(loaded.messages.is_empty());
}

#[tokio::test]
async fn unknown_session_is_none() {
    let repo = repo().await;
    assert!(repo.get_by_id("nope").await.expect("query").is_none());
}

#[tokio::test]
async fn history_keeps_arrival_order_and_metadata() {
    let repo = repo().await;
    let session = repo
        .create(&ChatSession::new("Ana".into(), "hosting".into()))
        .await
        .expect("create");

    for (role, text) in [
        (MessageRole::Customer, "hi"),
        (MessageRole::Assistant, "hello"),
        (MessageRole::Customer, "need a human"),
    ] {
        repo.append(&session.id, role, text, None)
            .await
            .expect("append");
    }
    repo.append(
        &session.id,
        MessageRole::System,
        "connecting",
        Some(json!({ "kind": "handoff" })),
    )
    .await
    .expect("append system");

    let history = repo.messages_for(&session.id).await.expect("history");
    let texts: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, vec!["hi", "hello", "need a human", "connecting"]);
    assert_eq!(history[3].metadata, Some(json!({ "kind": "handoff" })));
}

#[tokio::test]
async fn append_to_unknown_session_is_not_found() {
    let repo = repo().await;
    let err = repo
        .append("nope", MessageRole::Customer, "hi", None)
        .await
        .expect_err("unknown session");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn assignment_follows_stage_table() {
    let repo = repo().await;
    let session = repo
        .create(&ChatSession::new("Ana".into(), "hosting".into()))
        .await
        .expect("create");

    let assigned = repo
        .update_assignment(&session.id, Some("a"), SessionStage::HumanAgent)
        .await
        .expect("assign");
    assert_eq!(assigned.assigned_agent_id.as_deref(), Some("a"));

    repo.update_assignment(&session.id, None, SessionStage::Completed)
        .await
        .expect("close");
    let err = repo
        .update_assignment(&session.id, None, SessionStage::AiHandling)
        .await
        .expect_err("completed is terminal");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn escalation_flag_persists() {
    let repo = repo().await;
    let session = repo
        .create(&ChatSession::new("Ana".into(), "hosting".into()))
        .await
        .expect("create");

    repo.update_escalated(&session.id, true).await.expect("flag");
    assert!(repo
        .get_by_id(&session.id)
        .await
        .expect("query")
        .expect("exists")
        .escalated);

    let err = repo
        .update_escalated("nope", true)
        .await
        .expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}
