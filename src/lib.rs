#![forbid(unsafe_code)]

//! Live handoff orchestration between an AI assistant and human support
//! agents: agent directory, transfer state machine and real-time delivery.

pub mod config;
pub mod delivery;
pub mod directory;
pub mod errors;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod store;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
