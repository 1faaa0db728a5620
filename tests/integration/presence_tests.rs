//! Integration tests for agent presence changes.

use handoff_desk::models::agent::AgentStatus;
use handoff_desk::models::message::MessageRole;
use handoff_desk::models::session::SessionStage;
use handoff_desk::models::transfer::{
    TransferPriority, TransferReason, TransferStatus, TransferTrigger,
};
use handoff_desk::orchestrator::{RequestStatus, TransferRequest};
use handoff_desk::AppError;

use super::test_helpers::{agent, Harness};

fn ask(session_id: &str) -> TransferRequest {
    TransferRequest::new(
        session_id,
        TransferReason::CustomerRequest,
        TransferPriority::Medium,
    )
}

async fn hand_to(h: &Harness, session_id: &str, agent_id: &str) -> String {
    let transfer_id = h
        .orchestrator
        .request_transfer(ask(session_id))
        .await
        .expect("request")
        .transfer_id
        .expect("assigned");
    h.orchestrator
        .accept_transfer(&transfer_id, agent_id, None)
        .await
        .expect("accept");
    transfer_id
}

#[tokio::test]
async fn offline_with_no_cover_falls_back_to_assistant() {
    let h = Harness::with_agents(vec![agent("a", 3, &[("billing", 5)])]).await;
    let first = h.session("Abe", "billing").await;
    let second = h.session("Bea", "billing").await;
    let t1 = hand_to(&h, &first.id, "a").await;
    hand_to(&h, &second.id, "a").await;
    assert_eq!(h.agent("a").await.current_chat_count, 2);

    let outcome = h
        .orchestrator
        .set_agent_status("a", AgentStatus::Offline)
        .await
        .expect("offline");

    assert_eq!(outcome.agent.current_chat_count, 0);
    assert!(outcome.agent.active_sessions.is_empty());
    assert_eq!(outcome.fallback.len(), 2);
    assert!(outcome.rerouted.is_empty());

    for session_id in [&first.id, &second.id] {
        let reloaded = h.reload(session_id).await;
        assert_eq!(reloaded.stage, SessionStage::AiFallback);
        assert!(reloaded.assigned_agent_id.is_none());
        let notice = reloaded.messages.last().expect("notice");
        assert_eq!(notice.role, MessageRole::System);
        // History survives the fallback.
        assert!(reloaded.messages.len() > 3);
        assert!(h.queue.get(session_id).await.expect("query").is_some());
    }

    let closed = h.transfers.get_by_id(&t1).await.expect("load").expect("exists");
    assert_eq!(closed.status, TransferStatus::Completed);
    assert_eq!(closed.success, Some(false));

    let broadcasts = h.notifier.status_broadcasts.lock().unwrap().clone();
    assert!(broadcasts.contains(&("a".to_owned(), AgentStatus::Offline)));
}

#[tokio::test]
async fn offline_reroutes_held_sessions_to_other_agents() {
    let h = Harness::with_agents(vec![
        agent("a", 3, &[("billing", 5)]),
        agent("b", 3, &[("billing", 2)]),
    ])
    .await;
    let session = h.session("Cal", "billing").await;
    hand_to(&h, &session.id, "a").await;

    let outcome = h
        .orchestrator
        .set_agent_status("a", AgentStatus::Away)
        .await
        .expect("away");

    assert_eq!(outcome.rerouted.len(), 1);
    let transfer = h
        .transfers
        .get_by_id(&outcome.rerouted[0])
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(transfer.to_agent_id, "b");
    assert_eq!(transfer.reason, TransferReason::AgentUnavailable);
    assert_eq!(transfer.priority, TransferPriority::High);
    assert_eq!(transfer.trigger, TransferTrigger::Automatic);

    let reloaded = h.reload(&session.id).await;
    assert_eq!(reloaded.stage, SessionStage::AiHandling);
    assert!(reloaded.assigned_agent_id.is_none());

    h.orchestrator
        .accept_transfer(&transfer.id, "b", None)
        .await
        .expect("b accepts");
    assert_eq!(
        h.reload(&session.id).await.assigned_agent_id.as_deref(),
        Some("b")
    );
}

#[tokio::test]
async fn offline_withdraws_and_reroutes_pending_offers() {
    let h = Harness::with_agents(vec![
        agent("a", 3, &[("billing", 5)]),
        agent("b", 3, &[("billing", 2)]),
    ])
    .await;
    let session = h.session("Dot", "billing").await;
    let offered = h
        .orchestrator
        .request_transfer(ask(&session.id))
        .await
        .expect("request")
        .transfer_id
        .expect("assigned");

    let outcome = h
        .orchestrator
        .set_agent_status("a", AgentStatus::Break)
        .await
        .expect("break");

    assert_eq!(outcome.rerouted.len(), 1);
    let failed = h
        .transfers
        .get_by_id(&offered)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(failed.status, TransferStatus::Failed);
    assert!(h.agent("a").await.pending_offers.is_empty());
    assert_eq!(h.notifier.offers_to("b"), outcome.rerouted);

    let err = h
        .orchestrator
        .accept_transfer(&offered, "a", None)
        .await
        .expect_err("withdrawn offer");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn busy_agents_are_not_offered_sessions() {
    let h = Harness::with_agents(vec![agent("a", 3, &[("billing", 5)])]).await;
    h.orchestrator
        .set_agent_status("a", AgentStatus::Busy)
        .await
        .expect("busy");
    let session = h.session("Eli", "billing").await;

    let outcome = h
        .orchestrator
        .request_transfer(ask(&session.id))
        .await
        .expect("request");
    assert_eq!(outcome.status, RequestStatus::Queued);
}

#[tokio::test]
async fn coming_online_drains_queue() {
    let h = Harness::with_agents(vec![agent("a", 3, &[("billing", 5)])]).await;
    h.orchestrator
        .set_agent_status("a", AgentStatus::Offline)
        .await
        .expect("offline");
    let session = h.session("Flo", "billing").await;
    let queued = h
        .orchestrator
        .request_transfer(ask(&session.id))
        .await
        .expect("request");
    assert_eq!(queued.status, RequestStatus::Queued);

    let outcome = h
        .orchestrator
        .set_agent_status("a", AgentStatus::Online)
        .await
        .expect("online");

    assert_eq!(outcome.agent.pending_offers.len(), 1);
    assert_eq!(h.notifier.offers_to("a").len(), 1);
    assert!(h.queue.get(&session.id).await.expect("query").is_none());
}

#[tokio::test]
async fn unknown_agent_status_change_is_not_found() {
    let h = Harness::with_agents(Vec::new()).await;
    let err = h
        .orchestrator
        .set_agent_status("ghost", AgentStatus::Online)
        .await
        .expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn failed_reroute_of_held_session_still_falls_back() {
    let (h, store) = Harness::scripted(vec![
        agent("a", 3, &[("billing", 5)]),
        agent("b", 3, &[("billing", 2)]),
    ])
    .await;
    let session = h.session("Gus", "billing").await;
    hand_to(&h, &session.id, "a").await;
    *store.fail_on.lock().unwrap() = Some(SessionStage::AiHandling);

    let outcome = h
        .orchestrator
        .set_agent_status("a", AgentStatus::Offline)
        .await
        .expect("offline");

    assert_eq!(outcome.fallback, vec![session.id.clone()]);
    assert!(outcome.rerouted.is_empty());
    assert!(outcome.unresolved.is_empty());
    assert!(h.notifier.offers_to("b").is_empty());

    let reloaded = h.reload(&session.id).await;
    assert_eq!(reloaded.stage, SessionStage::AiFallback);
    assert!(reloaded.assigned_agent_id.is_none());
    let entry = h
        .queue
        .get(&session.id)
        .await
        .expect("query")
        .expect("queued");
    assert_eq!(entry.exclude_agent_id.as_deref(), Some("a"));
}
