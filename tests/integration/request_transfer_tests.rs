//! Integration tests for handoff requests: selection, queueing and guards.

use handoff_desk::models::transfer::{TransferPriority, TransferReason, TransferStatus};
use handoff_desk::orchestrator::{RequestStatus, TransferRequest};
use handoff_desk::AppError;

use super::test_helpers::{agent, Harness};

fn ask(session_id: &str) -> TransferRequest {
    TransferRequest::new(
        session_id,
        TransferReason::ComplexityEscalation,
        TransferPriority::Medium,
    )
}

#[tokio::test]
async fn assigns_most_skilled_agent_and_reserves_offer() {
    let h = Harness::with_agents(vec![
        agent("a", 3, &[("web_development", 3)]),
        agent("b", 3, &[("web_development", 5)]),
    ])
    .await;
    let session = h.session("Dana", "web_development").await;

    let outcome = h
        .orchestrator
        .request_transfer(ask(&session.id))
        .await
        .expect("request");

    assert_eq!(outcome.status, RequestStatus::Assigned);
    let chosen = outcome.agent.expect("agent chosen");
    assert_eq!(chosen.id, "b");
    let transfer_id = outcome.transfer_id.expect("transfer id");
    assert_eq!(h.notifier.offers_to("b"), vec![transfer_id.clone()]);

    let b = h.agent("b").await;
    assert_eq!(b.pending_offers, vec![transfer_id.clone()]);
    assert_eq!(b.current_chat_count, 0);

    let stored = h
        .transfers
        .get_by_id(&transfer_id)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(stored.status, TransferStatus::Pending);
    assert_eq!(stored.context.recent_messages.len(), 2);
    assert!(stored.context.summary.contains("Dana"));
}

#[tokio::test]
async fn offers_count_toward_capacity_so_agents_are_not_double_booked() {
    let h = Harness::with_agents(vec![
        agent("a", 1, &[("billing", 5)]),
        agent("b", 1, &[("billing", 2)]),
    ])
    .await;
    let first = h.session("Ana", "billing").await;
    let second = h.session("Ben", "billing").await;
    let third = h.session("Cy", "billing").await;

    let one = h.orchestrator.request_transfer(ask(&first.id)).await.expect("first");
    let two = h.orchestrator.request_transfer(ask(&second.id)).await.expect("second");
    let three = h.orchestrator.request_transfer(ask(&third.id)).await.expect("third");

    assert_eq!(one.agent.expect("first agent").id, "a");
    assert_eq!(two.agent.expect("second agent").id, "b");
    assert_eq!(three.status, RequestStatus::Queued);
    assert_eq!(three.queue_position, Some(1));
}

#[tokio::test]
async fn no_agents_queues_without_failed_transfer() {
    let h = Harness::with_agents(Vec::new()).await;
    let session = h.session("Eve", "web_development").await;

    let outcome = h
        .orchestrator
        .request_transfer(ask(&session.id))
        .await
        .expect("request");

    assert_eq!(outcome.status, RequestStatus::Queued);
    assert!(outcome.transfer_id.is_none());
    assert_eq!(outcome.queue_position, Some(1));
    assert_eq!(
        outcome.estimated_wait_seconds,
        h.orchestrator.settings().queued_wait_seconds
    );

    let transfers = h.transfers.list_for_session(&session.id).await.expect("list");
    assert!(transfers.is_empty());
    assert_eq!(h.queue.position(&session.id).await.expect("position"), Some(1));
    assert_eq!(h.notifier.system_texts(&session.id).len(), 1);
}

#[tokio::test]
async fn queue_estimate_scales_with_position() {
    let h = Harness::with_agents(Vec::new()).await;
    let first = h.session("Ana", "billing").await;
    let second = h.session("Ben", "billing").await;

    h.orchestrator.request_transfer(ask(&first.id)).await.expect("first");
    let outcome = h.orchestrator.request_transfer(ask(&second.id)).await.expect("second");

    assert_eq!(outcome.queue_position, Some(2));
    assert_eq!(
        outcome.estimated_wait_seconds,
        2 * h.orchestrator.settings().queued_wait_seconds
    );
}

#[tokio::test]
async fn excluded_agent_is_never_offered() {
    let h = Harness::with_agents(vec![
        agent("a", 3, &[("billing", 5)]),
        agent("b", 3, &[("billing", 1)]),
    ])
    .await;
    let session = h.session("Fay", "billing").await;

    let mut request = ask(&session.id);
    request.exclude_agent_id = Some("a".into());
    let outcome = h.orchestrator.request_transfer(request).await.expect("request");

    assert_eq!(outcome.agent.expect("agent").id, "b");
    assert!(h.notifier.offers_to("a").is_empty());
}

#[tokio::test]
async fn unskilled_agents_are_still_candidates() {
    let h = Harness::with_agents(vec![agent("a", 2, &[("hosting", 4)])]).await;
    let session = h.session("Gus", "billing").await;

    let outcome = h
        .orchestrator
        .request_transfer(ask(&session.id))
        .await
        .expect("request");

    assert_eq!(outcome.status, RequestStatus::Assigned);
}

#[tokio::test]
async fn second_request_while_pending_is_rejected() {
    let h = Harness::with_agents(vec![agent("a", 3, &[("billing", 5)])]).await;
    let session = h.session("Hal", "billing").await;
    h.orchestrator.request_transfer(ask(&session.id)).await.expect("first");

    let err = h
        .orchestrator
        .request_transfer(ask(&session.id))
        .await
        .expect_err("duplicate must fail");
    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = Harness::with_agents(vec![agent("a", 3, &[("billing", 5)])]).await;
    let err = h
        .orchestrator
        .request_transfer(ask("missing"))
        .await
        .expect_err("unknown session");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn confidence_out_of_range_is_rejected() {
    let h = Harness::with_agents(vec![agent("a", 3, &[("billing", 5)])]).await;
    let session = h.session("Ivy", "billing").await;
    let mut request = ask(&session.id);
    request.confidence = Some(1.5);

    let err = h
        .orchestrator
        .request_transfer(request)
        .await
        .expect_err("confidence");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn caller_summary_and_confidence_travel_with_transfer() {
    let h = Harness::with_agents(vec![agent("a", 3, &[("billing", 5)])]).await;
    let session = h.session("Jo", "billing").await;
    let mut request = ask(&session.id);
    request.summary = Some("Refund for double charge".into());
    request.confidence = Some(0.25);

    let outcome = h.orchestrator.request_transfer(request).await.expect("request");
    let transfer = h
        .transfers
        .get_by_id(&outcome.transfer_id.expect("id"))
        .await
        .expect("load")
        .expect("exists");

    assert_eq!(transfer.context.summary, "Refund for double charge");
    assert_eq!(transfer.context.confidence, Some(0.25));
}

#[tokio::test]
async fn handing_agent_must_hold_session() {
    let h = Harness::with_agents(vec![
        agent("a", 3, &[("billing", 5)]),
        agent("b", 3, &[("billing", 5)]),
    ])
    .await;
    let session = h.session("Kim", "billing").await;
    let mut request = ask(&session.id);
    request.from_agent_id = Some("a".into());

    let err = h
        .orchestrator
        .request_transfer(request)
        .await
        .expect_err("not holder");
    assert!(matches!(err, AppError::Validation(_)));
}
