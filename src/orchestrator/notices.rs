//! Customer-facing status text.
//!
//! Customers only ever see these sentences; error codes stay on the
//! caller side.

pub(crate) fn queued(position: u32, wait_seconds: u64) -> String {
    let minutes = wait_seconds.div_ceil(60).max(1);
    format!(
        "All of our agents are busy right now. You are number {position} in line; \
         the expected wait is about {minutes} minute(s). The assistant will keep helping meanwhile."
    )
}

pub(crate) fn connecting(agent_name: &str) -> String {
    format!("Connecting you with {agent_name}, one moment please.")
}

pub(crate) fn connected(agent_name: &str) -> String {
    format!("You are now chatting with {agent_name}.")
}

pub(crate) fn greeting(customer_name: &str, agent_name: &str) -> String {
    format!("Hi {customer_name}, this is {agent_name}. I have read your conversation so far and will take it from here.")
}

pub(crate) fn escalated() -> String {
    "We could not reach an agent just now. Your request has been flagged as a priority and \
     the assistant will continue helping until an agent is free."
        .to_owned()
}

pub(crate) fn agent_unavailable(agent_name: &str) -> String {
    format!(
        "{agent_name} is no longer available. The assistant has the full conversation \
         and will continue helping while we find another agent."
    )
}

pub(crate) fn returned_to_assistant() -> String {
    "Your agent has handed the conversation back to the assistant.".to_owned()
}

pub(crate) fn session_closed() -> String {
    "This conversation has been closed. Thank you for contacting us.".to_owned()
}
