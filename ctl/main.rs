#![forbid(unsafe_code)]

//! `handoff-desk-ctl`: operator CLI for a running `handoff-desk` server.
//!
//! Thin wrapper over the HTTP API: each subcommand issues one request and
//! prints the JSON response.

use clap::{Parser, Subcommand};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "handoff-desk-ctl",
    about = "Operator CLI for the handoff-desk server",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the server.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List agents with status and load.
    Agents,

    /// List transfers waiting on an agent.
    Pending {
        /// Agent ID.
        agent_id: String,
    },

    /// Ask for a human agent on a session.
    Request {
        /// Session ID.
        session_id: String,
        /// Handoff reason, e.g. `customer_request`.
        #[arg(long, default_value = "customer_request")]
        reason: String,
        /// Priority: low, medium, high or urgent.
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Agent that must not receive the session.
        #[arg(long)]
        exclude: Option<String>,
        /// Agent handing the session over.
        #[arg(long)]
        from_agent: Option<String>,
        /// Conversation summary for the receiving agent.
        #[arg(long)]
        summary: Option<String>,
    },

    /// Accept a transfer on behalf of an agent.
    Accept {
        /// Transfer ID.
        transfer_id: String,
        /// Accepting agent ID.
        #[arg(long)]
        agent: String,
        /// Greeting posted to the customer.
        #[arg(long)]
        message: Option<String>,
    },

    /// Decline a transfer on behalf of an agent.
    Decline {
        /// Transfer ID.
        transfer_id: String,
        /// Declining agent ID.
        #[arg(long)]
        agent: String,
        /// Optional decline reason.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Complete an accepted transfer.
    Complete {
        /// Transfer ID.
        transfer_id: String,
        /// Mark the conversation as unresolved.
        #[arg(long)]
        failed: bool,
    },

    /// Withdraw a pending transfer.
    Cancel {
        /// Transfer ID.
        transfer_id: String,
        /// Optional cancellation reason.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Change an agent's presence status.
    Status {
        /// Agent ID.
        agent_id: String,
        /// online, offline, busy, away or break.
        status: String,
    },
}

impl Command {
    fn request(&self) -> (Method, String, Option<Value>) {
        match self {
            Self::Agents => (Method::GET, "/api/agents".into(), None),
            Self::Pending { agent_id } => (
                Method::GET,
                format!("/api/agents/{agent_id}/transfers/pending"),
                None,
            ),
            Self::Request {
                session_id,
                reason,
                priority,
                exclude,
                from_agent,
                summary,
            } => (
                Method::POST,
                "/api/transfers".into(),
                Some(json!({
                    "session_id": session_id,
                    "reason": reason,
                    "priority": priority,
                    "exclude_agent_id": exclude,
                    "from_agent_id": from_agent,
                    "summary": summary,
                })),
            ),
            Self::Accept {
                transfer_id,
                agent,
                message,
            } => (
                Method::POST,
                format!("/api/transfers/{transfer_id}/accept"),
                Some(json!({ "agent_id": agent, "message": message })),
            ),
            Self::Decline {
                transfer_id,
                agent,
                reason,
            } => (
                Method::POST,
                format!("/api/transfers/{transfer_id}/decline"),
                Some(json!({ "agent_id": agent, "reason": reason })),
            ),
            Self::Complete {
                transfer_id,
                failed,
            } => (
                Method::POST,
                format!("/api/transfers/{transfer_id}/complete"),
                Some(json!({ "success": !failed })),
            ),
            Self::Cancel {
                transfer_id,
                reason,
            } => (
                Method::POST,
                format!("/api/transfers/{transfer_id}/cancel"),
                Some(json!({ "reason": reason })),
            ),
            Self::Status { agent_id, status } => (
                Method::PUT,
                format!("/api/agents/{agent_id}/status"),
                Some(json!({ "status": status })),
            ),
        }
    }
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(send(&args)) {
        Ok((status, body)) if status.is_success() => {
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
        Ok((status, body)) => {
            let err_msg = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            eprintln!("Error ({status}): {err_msg}");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Failed to reach server: {err}");
            eprintln!("Is handoff-desk running at '{}'?", args.server);
            std::process::exit(1);
        }
    }
}

/// Send the subcommand's request and decode the JSON response.
async fn send(args: &Cli) -> std::result::Result<(StatusCode, Value), reqwest::Error> {
    let (method, path, body) = args.command.request();
    let url = format!("{}{path}", args.server.trim_end_matches('/'));

    let client = reqwest::Client::new();
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status();
    let body = response.json::<Value>().await?;
    Ok((status, body))
}
