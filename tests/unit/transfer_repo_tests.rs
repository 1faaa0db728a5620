use std::sync::Arc;

use chrono::{Duration, Utc};
use handoff_desk::models::transfer::{
    Transfer, TransferContext, TransferPriority, TransferReason, TransferStatus, TransferTrigger,
};
use handoff_desk::persistence::db;
use handoff_desk::persistence::transfer_repo::TransferRepo;
use handoff_desk::AppError;

async fn repo() -> TransferRepo {
    let database = db::connect_memory().await.expect("db connect");
    TransferRepo::new(Arc::new(database))
}

fn pending(session_id: &str, to: &str) -> Transfer {
    Transfer::new(
        session_id.into(),
        None,
        to.into(),
        TransferReason::CustomerRequest,
        TransferPriority::Medium,
        TransferTrigger::Manual,
        TransferContext {
            summary: "summary".into(),
            recent_messages: Vec::new(),
            confidence: Some(0.5),
        },
    )
}

#[tokio::test]
async fn create_and_reload_keeps_context() {
    let repo = repo().await;
    let transfer = pending("s1", "a");
    repo.create(&transfer).await.expect("create");

    let loaded = repo
        .get_by_id(&transfer.id)
        .await
        .expect("query")
        .expect("exists");
    assert_eq!(loaded.context, transfer.context);
    assert_eq!(loaded.status, TransferStatus::Pending);
    assert_eq!(loaded.requested_at.timestamp(), transfer.requested_at.timestamp());
}

#[tokio::test]
async fn one_pending_transfer_per_session() {
    let repo = repo().await;
    repo.create(&pending("s1", "a")).await.expect("first");

    let err = repo
        .create(&pending("s1", "b"))
        .await
        .expect_err("second pending");
    assert!(matches!(err, AppError::Validation(_)));

    repo.create(&pending("s2", "b")).await.expect("other session");
}

#[tokio::test]
async fn accept_is_compare_and_set() {
    let repo = repo().await;
    let transfer = repo.create(&pending("s1", "a")).await.expect("create");

    let accepted = repo
        .mark_accepted(&transfer.id)
        .await
        .expect("update")
        .expect("won");
    assert_eq!(accepted.status, TransferStatus::Accepted);
    assert!(accepted.responded_at.is_some());

    assert!(repo.mark_accepted(&transfer.id).await.expect("update").is_none());
    assert!(repo
        .resolve_pending(&transfer.id, TransferStatus::Declined, None)
        .await
        .expect("update")
        .is_none());
}

#[tokio::test]
async fn resolving_frees_session_for_new_pending() {
    let repo = repo().await;
    let first = repo.create(&pending("s1", "a")).await.expect("create");

    let declined = repo
        .resolve_pending(&first.id, TransferStatus::Declined, Some("busy"))
        .await
        .expect("update")
        .expect("was pending");
    assert_eq!(declined.resolution_note.as_deref(), Some("busy"));

    repo.create(&first.reroute_to("b".into()))
        .await
        .expect("reroute insert");
    let current = repo
        .get_pending_for_session("s1")
        .await
        .expect("query")
        .expect("pending");
    assert_eq!(current.to_agent_id, "b");
    assert_eq!(current.parent_transfer_id.as_deref(), Some(first.id.as_str()));
}

#[tokio::test]
async fn resolve_rejects_non_terminal_target() {
    let repo = repo().await;
    let transfer = repo.create(&pending("s1", "a")).await.expect("create");
    let err = repo
        .resolve_pending(&transfer.id, TransferStatus::Accepted, None)
        .await
        .expect_err("not a resolution");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn completion_requires_accepted() {
    let repo = repo().await;
    let transfer = repo.create(&pending("s1", "a")).await.expect("create");
    assert!(repo
        .mark_completed(&transfer.id, true)
        .await
        .expect("update")
        .is_none());

    repo.mark_accepted(&transfer.id).await.expect("accept");
    let completed = repo
        .mark_completed(&transfer.id, false)
        .await
        .expect("update")
        .expect("was accepted");
    assert_eq!(completed.status, TransferStatus::Completed);
    assert_eq!(completed.success, Some(false));
    assert!(completed.completed_at.is_some());
}

#[tokio::test]
async fn stale_listing_uses_cutoff() {
    let repo = repo().await;
    let mut old = pending("s1", "a");
    old.requested_at = Utc::now() - Duration::minutes(10);
    repo.create(&old).await.expect("old");
    repo.create(&pending("s2", "a")).await.expect("fresh");

    let stale = repo
        .list_pending_before(Utc::now() - Duration::minutes(5))
        .await
        .expect("query");
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, old.id);

    assert_eq!(repo.list_pending().await.expect("all").len(), 2);
    assert_eq!(repo.list_pending_for_agent("a").await.expect("agent").len(), 2);
    assert!(repo.list_pending_for_agent("b").await.expect("agent").is_empty());
}

#[tokio::test]
async fn session_history_lists_every_attempt() {
    let repo = repo().await;
    let first = repo.create(&pending("s1", "a")).await.expect("create");
    repo.resolve_pending(&first.id, TransferStatus::Failed, Some("timed out"))
        .await
        .expect("fail");
    repo.create(&first.reroute_to("b".into()))
        .await
        .expect("reroute");

    let history = repo.list_for_session("s1").await.expect("list");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, first.id);
}
