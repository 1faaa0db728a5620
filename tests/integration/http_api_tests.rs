//! End-to-end tests for the REST API over a real listener.

use reqwest::StatusCode;
use serde_json::{json, Value};

use super::test_helpers::TestServer;

async fn post(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let response = client.post(url).json(&body).send().await.expect("send");
    let status = response.status();
    (status, response.json().await.expect("json body"))
}

async fn online(server: &TestServer, client: &reqwest::Client, agent_id: &str) {
    let response = client
        .put(server.url(&format!("/api/agents/{agent_id}/status")))
        .json(&json!({ "status": "online" }))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::OK);
}

async fn new_session(server: &TestServer, client: &reqwest::Client) -> String {
    let (status, body) = post(
        client,
        server.url("/api/sessions"),
        json!({ "customer_name": "Robin", "service_type": "billing" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().expect("session id").to_owned()
}

#[tokio::test]
async fn health_reports_connection_counts() {
    let server = TestServer::start().await;
    let body: Value = reqwest::get(server.url("/health"))
        .await
        .expect("get")
        .json()
        .await
        .expect("json");

    assert_eq!(body["status"], "ok");
    assert_eq!(body["agents_connected"], 0);
    assert_eq!(body["customers_connected"], 0);
}

#[tokio::test]
async fn full_handoff_round_trip() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    online(&server, &client, "a").await;
    let session_id = new_session(&server, &client).await;

    let (status, outcome) = post(
        &client,
        server.url("/api/transfers"),
        json!({ "session_id": session_id, "reason": "customer_request", "priority": "high" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "assigned");
    assert_eq!(outcome["agent"]["id"], "a");
    let transfer_id = outcome["transfer_id"].as_str().expect("id").to_owned();

    let pending: Value = client
        .get(server.url("/api/agents/a/transfers/pending"))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    assert_eq!(pending.as_array().expect("array").len(), 1);

    let (status, accepted) = post(
        &client,
        server.url(&format!("/api/transfers/{transfer_id}/accept")),
        json!({ "agent_id": "a" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");

    let session: Value = client
        .get(server.url(&format!("/api/sessions/{session_id}")))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    assert_eq!(session["stage"], "human_agent");
    assert_eq!(session["assigned_agent_id"], "a");

    let (status, completed) = post(
        &client,
        server.url(&format!("/api/transfers/{transfer_id}/complete")),
        json!({ "success": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["transfer"]["status"], "completed");
    assert!(completed["metrics"]["transfer_time_seconds"].is_i64());

    let agents: Value = client
        .get(server.url("/api/agents"))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    let a = agents
        .as_array()
        .expect("array")
        .iter()
        .find(|agent| agent["id"] == "a")
        .expect("agent a");
    assert_eq!(a["current_chat_count"], 0);
}

#[tokio::test]
async fn request_without_agents_online_is_queued() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let session_id = new_session(&server, &client).await;

    let (status, outcome) = post(
        &client,
        server.url("/api/transfers"),
        json!({ "session_id": session_id, "reason": "ai_escalation" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "queued");
    assert_eq!(outcome["queue_position"], 1);
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let (status, body) = post(
        &client,
        server.url("/api/transfers"),
        json!({ "session_id": "missing", "reason": "customer_request" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = post(
        &client,
        server.url("/api/transfers/missing/accept"),
        json!({ "agent_id": "a" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post(
        &client,
        server.url("/api/sessions"),
        json!({ "customer_name": " ", "service_type": "billing" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_accepts_empty_body() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    online(&server, &client, "a").await;
    let session_id = new_session(&server, &client).await;
    let (_, outcome) = post(
        &client,
        server.url("/api/transfers"),
        json!({ "session_id": session_id, "reason": "customer_request" }),
    )
    .await;
    let transfer_id = outcome["transfer_id"].as_str().expect("id").to_owned();

    let response = client
        .post(server.url(&format!("/api/transfers/{transfer_id}/cancel")))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::OK);
    let cancelled: Value = response.json().await.expect("json");
    assert_eq!(cancelled["status"], "failed");
    assert_eq!(cancelled["resolution_note"], "cancelled");
}

#[tokio::test]
async fn ending_session_via_api_closes_it() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    let session_id = new_session(&server, &client).await;

    let (status, session) = post(
        &client,
        server.url(&format!("/api/sessions/{session_id}/end")),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["stage"], "completed");

    let transfers: Value = client
        .get(server.url(&format!("/api/sessions/{session_id}/transfers")))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    assert!(transfers.as_array().expect("array").is_empty());
}
