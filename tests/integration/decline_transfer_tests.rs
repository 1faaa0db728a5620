//! Integration tests for declines, rerouting and escalation.

use handoff_desk::config::HandoffConfig;
use handoff_desk::models::message::MessageRole;
use handoff_desk::models::session::SessionStage;
use handoff_desk::models::transfer::{
    TransferPriority, TransferReason, TransferStatus, TransferTrigger,
};
use handoff_desk::orchestrator::TransferRequest;
use handoff_desk::AppError;

use super::test_helpers::{agent, Harness};

async fn offer(h: &Harness, session_id: &str) -> String {
    h.orchestrator
        .request_transfer(TransferRequest::new(
            session_id,
            TransferReason::AiEscalation,
            TransferPriority::Medium,
        ))
        .await
        .expect("request")
        .transfer_id
        .expect("assigned")
}

#[tokio::test]
async fn decline_reroutes_to_next_agent_with_same_context() {
    let h = Harness::with_agents(vec![
        agent("a", 2, &[("hosting", 5)]),
        agent("b", 2, &[("hosting", 3)]),
    ])
    .await;
    let session = h.session("Uma", "hosting").await;
    let first = offer(&h, &session.id).await;

    let outcome = h
        .orchestrator
        .decline_transfer(&first, "a", Some("on a call"))
        .await
        .expect("decline");

    assert!(outcome.rerouted);
    assert!(!outcome.escalated);
    assert_eq!(outcome.agent_id.as_deref(), Some("b"));

    let declined = h
        .transfers
        .get_by_id(&first)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(declined.status, TransferStatus::Declined);
    assert_eq!(declined.resolution_note.as_deref(), Some("on a call"));

    let next = h
        .transfers
        .get_by_id(&outcome.transfer_id.expect("new id"))
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(next.context, declined.context);
    assert_eq!(next.trigger, TransferTrigger::Automatic);
    assert_eq!(next.reroute_count, 1);
    assert_eq!(next.parent_transfer_id.as_deref(), Some(first.as_str()));

    assert!(h.agent("a").await.pending_offers.is_empty());
    assert_eq!(h.agent("b").await.pending_offers, vec![next.id.clone()]);
}

#[tokio::test]
async fn decline_with_nobody_left_escalates() {
    let h = Harness::with_agents(vec![agent("a", 2, &[("hosting", 5)])]).await;
    let session = h.session("Vic", "hosting").await;
    let first = offer(&h, &session.id).await;

    let outcome = h
        .orchestrator
        .decline_transfer(&first, "a", None)
        .await
        .expect("decline");

    assert!(!outcome.rerouted);
    assert!(outcome.escalated);
    assert!(outcome.transfer_id.is_none());

    let pending = h
        .transfers
        .get_pending_for_session(&session.id)
        .await
        .expect("query");
    assert!(pending.is_none());

    let reloaded = h.reload(&session.id).await;
    assert_eq!(reloaded.stage, SessionStage::AiFallback);
    assert!(reloaded.escalated);
    assert_eq!(
        reloaded.messages.last().expect("notice").role,
        MessageRole::System
    );

    let entry = h
        .queue
        .get(&session.id)
        .await
        .expect("query")
        .expect("queued");
    assert!(entry.escalated);
    assert_eq!(entry.priority, TransferPriority::Urgent);
    assert_eq!(entry.exclude_agent_id.as_deref(), Some("a"));
}

#[tokio::test]
async fn reroute_chain_stops_at_limit() {
    let settings = HandoffConfig {
        max_reroutes: 1,
        ..HandoffConfig::default()
    };
    let h = Harness::new(
        settings,
        vec![
            agent("a", 2, &[("hosting", 5)]),
            agent("b", 2, &[("hosting", 4)]),
            agent("c", 2, &[("hosting", 3)]),
        ],
    )
    .await;
    let session = h.session("Wes", "hosting").await;
    let first = offer(&h, &session.id).await;

    let rerouted = h
        .orchestrator
        .decline_transfer(&first, "a", None)
        .await
        .expect("first decline");
    assert!(rerouted.rerouted);
    let second = rerouted.transfer_id.expect("second transfer");

    let limited = h
        .orchestrator
        .decline_transfer(&second, "b", None)
        .await
        .expect("second decline");
    assert!(limited.escalated);
    assert!(h.notifier.offers_to("c").is_empty());
    assert!(h.reload(&session.id).await.escalated);
}

#[tokio::test]
async fn declining_twice_is_not_found() {
    let h = Harness::with_agents(vec![
        agent("a", 2, &[("hosting", 5)]),
        agent("b", 2, &[("hosting", 3)]),
    ])
    .await;
    let session = h.session("Xia", "hosting").await;
    let first = offer(&h, &session.id).await;
    h.orchestrator
        .decline_transfer(&first, "a", None)
        .await
        .expect("decline");

    let err = h
        .orchestrator
        .decline_transfer(&first, "a", None)
        .await
        .expect_err("already declined");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn rerouting_never_returns_to_decliner() {
    let h = Harness::with_agents(vec![
        agent("a", 5, &[("hosting", 5)]),
        agent("b", 5, &[("hosting", 1)]),
    ])
    .await;
    let session = h.session("Yan", "hosting").await;
    let first = offer(&h, &session.id).await;

    h.orchestrator
        .decline_transfer(&first, "a", None)
        .await
        .expect("decline");

    assert_eq!(h.notifier.offers_to("a"), vec![first]);
    assert_eq!(h.notifier.offers_to("b").len(), 1);
}

#[tokio::test]
async fn escalated_agent_handoff_stays_with_handing_agent() {
    let h = Harness::with_agents(vec![
        agent("a", 2, &[("hosting", 5)]),
        agent("b", 2, &[("hosting", 1)]),
    ])
    .await;
    let session = h.session("Zed", "hosting").await;
    let first = offer(&h, &session.id).await;
    h.orchestrator
        .accept_transfer(&first, "a", None)
        .await
        .expect("a accepts");

    let mut request = TransferRequest::new(
        session.id.clone(),
        TransferReason::WorkloadBalance,
        TransferPriority::Low,
    );
    request.from_agent_id = Some("a".into());
    let second = h
        .orchestrator
        .request_transfer(request)
        .await
        .expect("handoff")
        .transfer_id
        .expect("offered to b");

    let outcome = h
        .orchestrator
        .decline_transfer(&second, "b", None)
        .await
        .expect("b declines");
    assert!(outcome.escalated);

    let reloaded = h.reload(&session.id).await;
    assert_eq!(reloaded.stage, SessionStage::HumanAgent);
    assert_eq!(reloaded.assigned_agent_id.as_deref(), Some("a"));
    assert!(reloaded.escalated);
    assert_eq!(h.agent("a").await.current_chat_count, 1);

    let entry = h
        .queue
        .get(&session.id)
        .await
        .expect("query")
        .expect("queued");
    assert_eq!(entry.from_agent_id.as_deref(), Some("a"));
}
