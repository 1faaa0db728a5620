use std::sync::Arc;

use chrono::{Duration, Utc};
use handoff_desk::models::queue::QueueEntry;
use handoff_desk::models::transfer::{TransferPriority, TransferReason};
use handoff_desk::persistence::db;
use handoff_desk::persistence::queue_repo::QueueRepo;

async fn repo() -> QueueRepo {
    let database = db::connect_memory().await.expect("db connect");
    QueueRepo::new(Arc::new(database))
}

fn entry(session_id: &str, priority: TransferPriority, minutes_ago: i64) -> QueueEntry {
    QueueEntry {
        session_id: session_id.into(),
        reason: TransferReason::CustomerRequest,
        priority,
        from_agent_id: None,
        exclude_agent_id: None,
        summary: None,
        confidence: None,
        escalated: false,
        queued_at: Utc::now() - Duration::minutes(minutes_ago),
        attempts: 0,
    }
}

#[tokio::test]
async fn ordered_by_priority_then_age() {
    let repo = repo().await;
    repo.enqueue(&entry("low-old", TransferPriority::Low, 30))
        .await
        .expect("enqueue");
    repo.enqueue(&entry("high-new", TransferPriority::High, 1))
        .await
        .expect("enqueue");
    repo.enqueue(&entry("high-old", TransferPriority::High, 10))
        .await
        .expect("enqueue");
    repo.enqueue(&entry("urgent", TransferPriority::Urgent, 0))
        .await
        .expect("enqueue");

    let order: Vec<String> = repo
        .list_ordered()
        .await
        .expect("list")
        .into_iter()
        .map(|entry| entry.session_id)
        .collect();
    assert_eq!(order, vec!["urgent", "high-old", "high-new", "low-old"]);

    assert_eq!(repo.position("high-new").await.expect("position"), Some(3));
    assert_eq!(repo.position("missing").await.expect("position"), None);
}

#[tokio::test]
async fn requeue_keeps_age_and_ratchets_priority() {
    let repo = repo().await;
    let original = entry("s1", TransferPriority::High, 10);
    repo.enqueue(&original).await.expect("first");

    let mut again = entry("s1", TransferPriority::Low, 0);
    again.escalated = true;
    again.summary = Some("still waiting".into());
    repo.enqueue(&again).await.expect("second");

    let stored = repo.get("s1").await.expect("get").expect("queued");
    assert_eq!(stored.priority, TransferPriority::High);
    assert!(stored.escalated);
    assert_eq!(stored.summary.as_deref(), Some("still waiting"));
    assert_eq!(
        stored.queued_at.timestamp_micros(),
        original.queued_at.timestamp_micros()
    );

    let mut urgent = entry("s1", TransferPriority::Urgent, 0);
    urgent.escalated = false;
    repo.enqueue(&urgent).await.expect("third");
    let stored = repo.get("s1").await.expect("get").expect("queued");
    assert_eq!(stored.priority, TransferPriority::Urgent);
    assert!(stored.escalated, "escalation flag never drops");
}

#[tokio::test]
async fn attempts_and_removal() {
    let repo = repo().await;
    repo.enqueue(&entry("s1", TransferPriority::Medium, 0))
        .await
        .expect("enqueue");

    repo.record_attempt("s1").await.expect("attempt");
    repo.record_attempt("s1").await.expect("attempt");
    assert_eq!(
        repo.get("s1").await.expect("get").expect("queued").attempts,
        2
    );

    assert!(repo.remove("s1").await.expect("remove"));
    assert!(!repo.remove("s1").await.expect("remove again"));
    assert!(repo.list_ordered().await.expect("list").is_empty());
}
