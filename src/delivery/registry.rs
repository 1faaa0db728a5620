//! Concurrent connection registry keyed by agent id or session id.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::protocol::ServerFrame;

/// Outbound half of one live connection.
pub type FrameSender = UnboundedSender<ServerFrame>;

struct Connection {
    conn_id: u64,
    tx: FrameSender,
}

/// Map from an actor key to its live connection.
///
/// Registering a key again replaces the older connection; removal is
/// scoped to the connection id so a late disconnect of the replaced
/// socket cannot evict its successor.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Connection>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection under `key`. Returns its connection id.
    pub fn register(&self, key: &str, tx: FrameSender) -> u64 {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if self
            .connections
            .insert(key.to_owned(), Connection { conn_id, tx })
            .is_some()
        {
            debug!(key, "replaced existing connection");
        }
        conn_id
    }

    /// Drop `key` if it still maps to `conn_id`. Returns whether it did.
    pub fn remove(&self, key: &str, conn_id: u64) -> bool {
        self.connections
            .remove_if(key, |_, conn| conn.conn_id == conn_id)
            .is_some()
    }

    /// Send one frame. Absent or closed connections are a no-op.
    pub fn send(&self, key: &str, frame: ServerFrame) -> bool {
        let delivered = match self.connections.get(key) {
            Some(conn) => conn.tx.send(frame).is_ok(),
            None => return false,
        };
        if !delivered {
            self.connections.remove_if(key, |_, conn| conn.tx.is_closed());
        }
        delivered
    }

    /// Send a frame to every connection except `skip`. Returns the count reached.
    pub fn broadcast(&self, frame: &ServerFrame, skip: Option<&str>) -> usize {
        self.connections
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != skip)
            .filter(|entry| entry.value().tx.send(frame.clone()).is_ok())
            .count()
    }

    /// Whether `key` has a live connection.
    #[must_use]
    pub fn is_connected(&self, key: &str) -> bool {
        self.connections
            .get(key)
            .is_some_and(|conn| !conn.tx.is_closed())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
