//! In-memory presence: which connections are live and who they belong to.
//!
//! Presence is observability only. The relay never consults it when deciding
//! who receives a broadcast.

use std::collections::BTreeSet;

use dashmap::DashMap;
use relay_common::ConnectionId;

/// Thread-safe, DashMap-backed presence tracker.
#[derive(Default)]
pub struct PresenceTracker {
    /// connection → identity, `None` until the client tells us who it is.
    inner: DashMap<ConnectionId, Option<String>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection as online. Keeps an already known identity.
    pub fn mark_online(&self, connection_id: &ConnectionId) {
        self.inner.entry(connection_id.clone()).or_insert(None);
    }

    /// Record the identity behind an online connection.
    ///
    /// Returns `false` if the connection is not online (already gone), in
    /// which case nothing is recorded.
    pub fn identify(&self, connection_id: &ConnectionId, identity: &str) -> bool {
        match self.inner.get_mut(connection_id) {
            Some(mut entry) => {
                *entry = Some(identity.to_string());
                true
            }
            None => false,
        }
    }

    /// Remove a connection. Idempotent.
    pub fn mark_offline(&self, connection_id: &ConnectionId) -> bool {
        self.inner.remove(connection_id).is_some()
    }

    pub fn is_online(&self, connection_id: &ConnectionId) -> bool {
        self.inner.contains_key(connection_id)
    }

    pub fn identity_of(&self, connection_id: &ConnectionId) -> Option<String> {
        self.inner.get(connection_id).and_then(|e| e.value().clone())
    }

    /// Distinct identities with at least one live connection, sorted.
    pub fn online_identities(&self) -> Vec<String> {
        let ids: BTreeSet<String> = self
            .inner
            .iter()
            .filter_map(|e| e.value().clone())
            .collect();
        ids.into_iter().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.len()
    }
}
