//! Domain model module declarations.

pub mod agent;
pub mod message;
pub mod queue;
pub mod session;
pub mod transfer;
