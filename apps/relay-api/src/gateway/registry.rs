//! Room membership registry: which live connections belong to which rooms.
//!
//! Rooms are not stored entities. A room exists while at least one connection
//! is a member of it and disappears from the map when its last member leaves.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use relay_common::ConnectionId;

#[derive(Default)]
struct Memberships {
    /// room id → member connections.
    rooms: HashMap<String, HashSet<ConnectionId>>,
    /// connection → rooms it has joined (reverse index for disconnect).
    connections: HashMap<ConnectionId, HashSet<String>>,
}

/// In-memory room membership, shared by all connections of one relay.
///
/// Both indexes sit behind a single `parking_lot::Mutex` so every mutation is
/// atomic across them.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<Memberships>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room. Returns `false` if it was already a member.
    pub fn add_member(&self, room_id: &str, connection_id: &ConnectionId) -> bool {
        let mut m = self.inner.lock();
        let inserted = m
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.clone());
        if inserted {
            m.connections
                .entry(connection_id.clone())
                .or_default()
                .insert(room_id.to_string());
        }
        inserted
    }

    /// Remove a connection from one room. Returns `false` if it was not a member.
    pub fn remove_member(&self, room_id: &str, connection_id: &ConnectionId) -> bool {
        let mut m = self.inner.lock();
        let removed = match m.rooms.get_mut(room_id) {
            Some(members) => {
                let removed = members.remove(connection_id);
                if members.is_empty() {
                    m.rooms.remove(room_id);
                }
                removed
            }
            None => false,
        };
        if removed {
            if let Some(rooms) = m.connections.get_mut(connection_id) {
                rooms.remove(room_id);
                if rooms.is_empty() {
                    m.connections.remove(connection_id);
                }
            }
        }
        removed
    }

    /// Remove a connection from every room. Returns the rooms it left.
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> Vec<String> {
        let mut m = self.inner.lock();
        let Some(rooms) = m.connections.remove(connection_id) else {
            return Vec::new();
        };
        for room_id in &rooms {
            if let Some(members) = m.rooms.get_mut(room_id) {
                members.remove(connection_id);
                if members.is_empty() {
                    m.rooms.remove(room_id);
                }
            }
        }
        let mut left: Vec<String> = rooms.into_iter().collect();
        left.sort();
        left
    }

    /// Snapshot of a room's current members.
    pub fn list_members(&self, room_id: &str) -> Vec<ConnectionId> {
        self.inner
            .lock()
            .rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room_id: &str, connection_id: &ConnectionId) -> bool {
        self.inner
            .lock()
            .rooms
            .get(room_id)
            .is_some_and(|members| members.contains(connection_id))
    }

    /// Rooms a connection currently belongs to, sorted.
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .inner
            .lock()
            .connections
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }
}
