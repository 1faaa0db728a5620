use std::sync::Arc;

use chrono::Utc;
use handoff_desk::models::agent::{Agent, AgentStatus, SessionMeta, Skill};
use handoff_desk::persistence::agent_repo::AgentRepo;
use handoff_desk::persistence::db;

async fn repo() -> AgentRepo {
    let database = db::connect_memory().await.expect("db connect");
    AgentRepo::new(Arc::new(database))
}

fn agent(id: &str) -> Agent {
    Agent::new(
        id.into(),
        format!("Agent {id}"),
        3,
        vec![Skill {
            service: "hosting".into(),
            proficiency: 4,
        }],
    )
}

#[tokio::test]
async fn upsert_round_trips_runtime_state() {
    let repo = repo().await;
    let mut record = agent("a");
    record.status = AgentStatus::Online;
    record.current_chat_count = 1;
    record.active_sessions.push(SessionMeta {
        session_id: "s1".into(),
        customer_name: "Ana".into(),
        service_type: "hosting".into(),
        transfer_id: Some("t1".into()),
        assigned_at: Utc::now(),
    });
    record.pending_offers.push("t2".into());
    repo.upsert(&record).await.expect("upsert");

    let loaded = repo.get_by_id("a").await.expect("query").expect("exists");
    assert_eq!(loaded.status, AgentStatus::Online);
    assert_eq!(loaded.current_chat_count, 1);
    assert_eq!(loaded.active_sessions.len(), 1);
    assert_eq!(loaded.skills, record.skills);
    assert!(loaded.pending_offers.is_empty(), "offers are not persisted");
}

#[tokio::test]
async fn upsert_replaces_and_keeps_roster_order() {
    let repo = repo().await;
    repo.upsert(&agent("b")).await.expect("b");
    repo.upsert(&agent("a")).await.expect("a");

    let mut renamed = agent("b");
    renamed.display_name = "Blair".into();
    repo.upsert(&renamed).await.expect("update b");

    let roster = repo.list_all().await.expect("list");
    let ids: Vec<&str> = roster.iter().map(|agent| agent.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert_eq!(roster[0].display_name, "Blair");
}

#[tokio::test]
async fn missing_agent_is_none() {
    let repo = repo().await;
    assert!(repo.get_by_id("ghost").await.expect("query").is_none());
}
