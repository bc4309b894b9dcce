//! Per-connection outbound queues and room fan-out.
//!
//! Every live connection owns an unbounded queue drained by its socket writer
//! task. Broadcasting to a room is a synchronous push of one shared event into
//! the queue of each member.

use std::sync::Arc;

use dashmap::DashMap;
use relay_common::ConnectionId;
use tokio::sync::mpsc;

use super::events::ServerEvent;

pub type Outbound = Arc<ServerEvent>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Live connections and their outbound queues.
#[derive(Default)]
pub struct ConnectionTable {
    inner: DashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the receiving end of its queue.
    pub fn insert(&self, connection_id: ConnectionId) -> OutboundReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.insert(connection_id, tx);
        rx
    }

    /// Drop a connection's queue. Its writer task ends once the queue drains.
    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        self.inner.remove(connection_id).is_some()
    }

    /// Run `f` while holding the connection's entry, so a concurrent `remove`
    /// of the same connection waits until `f` returns. Returns `None` if the
    /// connection is gone.
    ///
    /// `f` must not touch this table.
    pub fn with_connection<R>(&self, connection_id: &ConnectionId, f: impl FnOnce() -> R) -> Option<R> {
        let entry = self.inner.get(connection_id)?;
        let result = f();
        drop(entry);
        Some(result)
    }

    /// Queue an event for a single connection.
    pub fn send(&self, connection_id: &ConnectionId, event: Outbound) -> bool {
        self.inner
            .get(connection_id)
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Queue an event for every listed connection that is still live.
    /// Returns how many queues accepted it.
    pub fn deliver(&self, members: &[ConnectionId], event: Outbound) -> usize {
        members
            .iter()
            .filter(|id| self.send(id, event.clone()))
            .count()
    }
}
