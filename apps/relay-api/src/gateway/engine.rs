//! Relay engine: connection lifecycle, room joins, message persistence and
//! room broadcast.
//!
//! Lock order: a connection-table entry may be held while taking the room
//! registry mutex, never the reverse. Room send locks are only held across
//! `append` + fan-out.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_common::ConnectionId;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::Config;
use crate::db::store::{MessageStore, StoreError};
use crate::error::RelayError;
use crate::identity::{self, IdentityDirectory, Resolution};
use crate::models::message::{AppendMessage, ChatMessage};

use super::events::ServerEvent;
use super::fanout::{ConnectionTable, OutboundReceiver};
use super::presence::PresenceTracker;
use super::registry::RoomRegistry;

/// Tunables for the relay.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub identity_timeout: Duration,
    pub max_message_len: usize,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            identity_timeout: config.identity_timeout,
            max_message_len: config.max_message_len,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings::from(&Config::default())
    }
}

struct EngineInner {
    connections: ConnectionTable,
    rooms: RoomRegistry,
    presence: PresenceTracker,
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn IdentityDirectory>,
    /// Per-room lock spanning persistence and fan-out, so a room's messages
    /// are delivered in the order they were persisted.
    send_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    settings: EngineSettings,
}

/// The relay. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RelayEngine {
    inner: Arc<EngineInner>,
}

impl RelayEngine {
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn IdentityDirectory>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                connections: ConnectionTable::new(),
                rooms: RoomRegistry::new(),
                presence: PresenceTracker::new(),
                store,
                directory,
                send_locks: DashMap::new(),
                settings,
            }),
        }
    }

    /// Register a new connection. Returns its id and the queue of events to
    /// write to its socket.
    pub fn connect(&self) -> (ConnectionId, OutboundReceiver) {
        let connection_id = ConnectionId::generate();
        let rx = self.inner.connections.insert(connection_id.clone());
        self.inner.presence.mark_online(&connection_id);
        tracing::info!(%connection_id, "connection registered");
        (connection_id, rx)
    }

    /// Subscribe a connection to a room. Idempotent; returns `false` if it was
    /// already a member. Any string is a valid room id.
    pub fn handle_join(&self, connection_id: &ConnectionId, room_id: &str) -> Result<bool, RelayError> {
        let joined = self
            .inner
            .connections
            .with_connection(connection_id, || self.inner.rooms.add_member(room_id, connection_id))
            .ok_or_else(|| RelayError::UnknownConnection(connection_id.clone()))?;

        if joined {
            tracing::info!(%connection_id, %room_id, "joined room");
        }
        Ok(joined)
    }

    /// Unsubscribe a connection from one room. Idempotent.
    pub fn handle_leave(&self, connection_id: &ConnectionId, room_id: &str) -> bool {
        let left = self.inner.rooms.remove_member(room_id, connection_id);
        if left {
            tracing::info!(%connection_id, %room_id, "left room");
            self.prune_send_lock(room_id);
        }
        left
    }

    /// Record the identity behind a connection for presence.
    pub fn identify(&self, connection_id: &ConnectionId, identity: &str) -> bool {
        self.inner.presence.identify(connection_id, identity)
    }

    /// Validate, persist and broadcast a message.
    ///
    /// Once validation passes, persistence and fan-out run on their own task
    /// and finish even if this future is dropped or the sender disconnects.
    pub async fn handle_message(
        &self,
        connection_id: &ConnectionId,
        room_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<ChatMessage, RelayError> {
        if !self.inner.rooms.is_member(room_id, connection_id) {
            return Err(RelayError::NotInRoom(room_id.to_string()));
        }

        let body = body.trim();
        if body.is_empty() {
            return Err(RelayError::EmptyMessage);
        }
        let max = self.inner.settings.max_message_len;
        if body.chars().count() > max {
            return Err(RelayError::MessageTooLong { max });
        }

        if self.inner.presence.identity_of(connection_id).is_none() {
            self.inner.presence.identify(connection_id, sender_id);
        }

        let inner = self.inner.clone();
        let message = AppendMessage {
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: String::new(),
            body: body.to_string(),
        };
        let origin = connection_id.clone();

        match tokio::spawn(async move { inner.persist_and_broadcast(&origin, message).await }).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(?err, %connection_id, %room_id, "relay task failed");
                Err(RelayError::Persistence(StoreError::Unavailable(err.to_string())))
            }
        }
    }

    /// Remove a connection from every room and from presence. Idempotent.
    /// Returns the rooms it was a member of.
    pub fn handle_disconnect(&self, connection_id: &ConnectionId) -> Vec<String> {
        // Table first: a join racing this call either lands before the
        // registry purge below or fails with UnknownConnection.
        let was_connected = self.inner.connections.remove(connection_id);
        let rooms = self.inner.rooms.remove_connection(connection_id);
        self.inner.presence.mark_offline(connection_id);

        for room_id in &rooms {
            self.prune_send_lock(room_id);
        }

        if was_connected {
            tracing::info!(%connection_id, rooms = rooms.len(), "connection closed");
        }
        rooms
    }

    /// Queue an event for a single connection.
    pub fn send_to(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        self.inner.connections.send(connection_id, Arc::new(event))
    }

    pub fn list_members(&self, room_id: &str) -> Vec<ConnectionId> {
        self.inner.rooms.list_members(room_id)
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.inner.rooms
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.inner.presence
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.inner.store
    }

    fn prune_send_lock(&self, room_id: &str) {
        self.inner.prune_send_lock(room_id);
    }
}

impl EngineInner {
    fn send_lock(&self, room_id: &str) -> Arc<AsyncMutex<()>> {
        self.send_locks
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop an empty room's send lock unless a relay task still holds it.
    fn prune_send_lock(&self, room_id: &str) {
        if self.rooms.list_members(room_id).is_empty() {
            self.send_locks
                .remove_if(room_id, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    async fn persist_and_broadcast(
        &self,
        origin: &ConnectionId,
        mut message: AppendMessage,
    ) -> Result<ChatMessage, RelayError> {
        let resolution = identity::resolve(
            self.directory.as_ref(),
            &message.sender_id,
            self.settings.identity_timeout,
        )
        .await;
        message.sender_name = resolution.display_name().to_string();

        let room_id = message.room_id.clone();
        let room_lock = self.send_lock(&room_id);
        let result = {
            let _guard = room_lock.lock().await;
            self.append_and_fan_out(origin, message, &resolution).await
        };

        // The room may have emptied while this task held the lock.
        drop(room_lock);
        self.prune_send_lock(&room_id);
        result
    }

    /// Must run under the room's send lock.
    async fn append_and_fan_out(
        &self,
        origin: &ConnectionId,
        message: AppendMessage,
        resolution: &Resolution,
    ) -> Result<ChatMessage, RelayError> {
        let room_id = message.room_id.clone();
        let persisted = self.store.append(message).await.map_err(|err| {
            tracing::error!(?err, connection_id = %origin, %room_id, "failed to persist message");
            RelayError::Persistence(err)
        })?;

        let members = self.rooms.list_members(&room_id);
        let event = Arc::new(ServerEvent::MessageDelivered(persisted.clone()));
        let delivered = self.connections.deliver(&members, event);

        tracing::debug!(
            connection_id = %origin,
            %room_id,
            message_id = persisted.id,
            fallback_name = resolution.is_fallback(),
            delivered,
            "message relayed"
        );

        Ok(persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::MemoryMessageStore;
    use crate::identity::{MemoryDirectory, NoDirectory, UNKNOWN_USER};

    fn engine_with(store: Arc<MemoryMessageStore>, directory: Arc<dyn IdentityDirectory>) -> RelayEngine {
        RelayEngine::new(store, directory, EngineSettings::default())
    }

    fn engine() -> (RelayEngine, Arc<MemoryMessageStore>) {
        let store = Arc::new(MemoryMessageStore::new());
        let directory = Arc::new(MemoryDirectory::new().with_user("usr_a", "Ada"));
        (engine_with(store.clone(), directory), store)
    }

    fn delivered(rx: &mut OutboundReceiver) -> Vec<ChatMessage> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::MessageDelivered(m) = event.as_ref() {
                out.push(m.clone());
            }
        }
        out
    }

    #[tokio::test]
    async fn repeated_join_is_idempotent() {
        let (engine, _) = engine();
        let (a, _rx) = engine.connect();

        assert!(engine.handle_join(&a, "trip-42").unwrap());
        assert!(!engine.handle_join(&a, "trip-42").unwrap());
        assert_eq!(engine.list_members("trip-42"), vec![a]);
    }

    #[tokio::test]
    async fn message_reaches_all_members_including_sender() {
        let (engine, store) = engine();
        let (a, mut rx_a) = engine.connect();
        let (b, mut rx_b) = engine.connect();
        let (c, mut rx_c) = engine.connect();
        engine.handle_join(&a, "trip-42").unwrap();
        engine.handle_join(&b, "trip-42").unwrap();
        engine.handle_join(&c, "elsewhere").unwrap();

        let msg = engine.handle_message(&a, "trip-42", "usr_a", "hello").await.unwrap();
        assert_eq!(msg.sender_name, "Ada");
        assert_eq!(msg.body, "hello");

        assert_eq!(delivered(&mut rx_a), vec![msg.clone()]);
        assert_eq!(delivered(&mut rx_b), vec![msg.clone()]);
        assert!(delivered(&mut rx_c).is_empty());
        assert_eq!(store.room_messages("trip-42"), vec![msg]);
    }

    #[tokio::test]
    async fn message_without_join_is_rejected() {
        let (engine, store) = engine();
        let (a, mut rx_a) = engine.connect();

        let err = engine.handle_message(&a, "trip-42", "usr_a", "hello").await.unwrap_err();
        assert!(matches!(err, RelayError::NotInRoom(ref r) if r == "trip-42"));
        assert!(store.is_empty());
        assert!(delivered(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let (engine, store) = engine();
        let (a, _rx) = engine.connect();
        engine.handle_join(&a, "trip-42").unwrap();

        let err = engine.handle_message(&a, "trip-42", "usr_a", "   \n\t").await.unwrap_err();
        assert!(matches!(err, RelayError::EmptyMessage));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn overlong_message_is_rejected() {
        let store = Arc::new(MemoryMessageStore::new());
        let engine = RelayEngine::new(
            store.clone(),
            Arc::new(NoDirectory),
            EngineSettings {
                identity_timeout: Duration::from_millis(10),
                max_message_len: 5,
            },
        );
        let (a, _rx) = engine.connect();
        engine.handle_join(&a, "trip-42").unwrap();

        let err = engine.handle_message(&a, "trip-42", "usr_a", "toolong").await.unwrap_err();
        assert!(matches!(err, RelayError::MessageTooLong { max: 5 }));
        // Trimmed length counts.
        engine.handle_message(&a, "trip-42", "usr_a", "  fine  ").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_broadcasts_nothing() {
        let (engine, store) = engine();
        let (a, mut rx_a) = engine.connect();
        let (b, mut rx_b) = engine.connect();
        engine.handle_join(&a, "trip-42").unwrap();
        engine.handle_join(&b, "trip-42").unwrap();
        store.set_unavailable(true);

        let err = engine.handle_message(&a, "trip-42", "usr_a", "hello").await.unwrap_err();
        assert!(matches!(err, RelayError::Persistence(_)));
        assert!(delivered(&mut rx_a).is_empty());
        assert!(delivered(&mut rx_b).is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unresolved_sender_gets_sentinel_name() {
        let store = Arc::new(MemoryMessageStore::new());
        let engine = engine_with(store.clone(), Arc::new(NoDirectory));
        let (a, mut rx_a) = engine.connect();
        engine.handle_join(&a, "trip-42").unwrap();

        let msg = engine.handle_message(&a, "trip-42", "usr_ghost", "boo").await.unwrap();
        assert_eq!(msg.sender_name, UNKNOWN_USER);
        assert_eq!(delivered(&mut rx_a)[0].sender_name, UNKNOWN_USER);
    }

    #[tokio::test]
    async fn disconnect_clears_rooms_and_presence() {
        let (engine, store) = engine();
        let (a, _rx) = engine.connect();
        engine.identify(&a, "usr_a");
        engine.handle_join(&a, "trip-42").unwrap();
        engine.handle_join(&a, "paris").unwrap();

        let left = engine.handle_disconnect(&a);
        assert_eq!(left, vec!["paris".to_string(), "trip-42".to_string()]);
        assert!(engine.rooms().rooms_of(&a).is_empty());
        assert!(!engine.presence().is_online(&a));
        assert!(engine.handle_disconnect(&a).is_empty());

        // Late message for the old connection id.
        let err = engine.handle_message(&a, "trip-42", "usr_a", "late").await.unwrap_err();
        assert!(matches!(err, RelayError::NotInRoom(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn join_after_disconnect_leaves_no_state() {
        let (engine, _) = engine();
        let (a, _rx) = engine.connect();
        engine.handle_disconnect(&a);

        let err = engine.handle_join(&a, "trip-42").unwrap_err();
        assert!(matches!(err, RelayError::UnknownConnection(_)));
        assert!(engine.list_members("trip-42").is_empty());
    }

    #[tokio::test]
    async fn leave_stops_delivery() {
        let (engine, _) = engine();
        let (a, _rx_a) = engine.connect();
        let (b, mut rx_b) = engine.connect();
        engine.handle_join(&a, "trip-42").unwrap();
        engine.handle_join(&b, "trip-42").unwrap();

        assert!(engine.handle_leave(&b, "trip-42"));
        assert!(!engine.handle_leave(&b, "trip-42"));
        engine.handle_message(&a, "trip-42", "usr_a", "hi").await.unwrap();
        assert!(delivered(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn sender_disconnecting_mid_flight_still_reaches_others() {
        let (engine, store) = engine();
        let (a, _rx_a) = engine.connect();
        let (b, mut rx_b) = engine.connect();
        engine.handle_join(&a, "trip-42").unwrap();
        engine.handle_join(&b, "trip-42").unwrap();

        // Hold the room's send lock so the relay task parks before persisting.
        let lock = engine.inner.send_lock("trip-42");
        let guard = lock.lock().await;

        let sender = engine.clone();
        let a2 = a.clone();
        let send = tokio::spawn(async move {
            sender.handle_message(&a2, "trip-42", "usr_a", "bye").await
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Drop the caller, disconnect the sender, then let persistence proceed.
        send.abort();
        engine.handle_disconnect(&a);
        drop(guard);

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let got = delivered(&mut rx_b);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body, "bye");
    }

    #[tokio::test]
    async fn last_member_leaving_mid_send_releases_room_lock() {
        let (engine, store) = engine();
        let (a, _rx_a) = engine.connect();
        engine.handle_join(&a, "trip-42").unwrap();

        let lock = engine.inner.send_lock("trip-42");
        let guard = lock.lock().await;

        let sender = engine.clone();
        let a2 = a.clone();
        let send = tokio::spawn(async move {
            sender.handle_message(&a2, "trip-42", "usr_a", "last words").await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The relay task holds a clone, so leaving cannot prune the lock yet.
        assert!(engine.handle_leave(&a, "trip-42"));
        assert!(engine.inner.send_locks.contains_key("trip-42"));

        drop(guard);
        drop(lock);
        send.await.unwrap().unwrap();

        assert_eq!(store.len(), 1);
        assert!(engine.inner.send_locks.is_empty());
    }

    #[tokio::test]
    async fn room_lock_is_kept_while_members_remain() {
        let (engine, _) = engine();
        let (a, _rx) = engine.connect();
        engine.handle_join(&a, "trip-42").unwrap();

        engine.handle_message(&a, "trip-42", "usr_a", "hi").await.unwrap();
        assert!(engine.inner.send_locks.contains_key("trip-42"));

        engine.handle_disconnect(&a);
        assert!(engine.inner.send_locks.is_empty());
    }

    #[test]
    fn join_racing_disconnect_never_leaves_membership() {
        let (engine, _) = engine();
        let rooms = ["trip-42", "paris", "lisbon"];

        for _ in 0..500 {
            let (c, _rx) = engine.connect();
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let joiner = {
                let (engine, c, barrier) = (engine.clone(), c.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    for room in rooms {
                        match engine.handle_join(&c, room) {
                            Ok(_) | Err(RelayError::UnknownConnection(_)) => {}
                            Err(err) => panic!("unexpected join error: {err}"),
                        }
                    }
                })
            };
            let leaver = {
                let (engine, c, barrier) = (engine.clone(), c.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    engine.handle_disconnect(&c);
                })
            };
            joiner.join().unwrap();
            leaver.join().unwrap();

            for room in rooms {
                assert!(engine.list_members(room).is_empty(), "dangling member in {room}");
            }
            assert!(engine.rooms().rooms_of(&c).is_empty());
            assert_eq!(engine.rooms().room_count(), 0);
            assert!(!engine.presence().is_online(&c));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_senders_are_delivered_in_persistence_order() {
        let (engine, store) = engine();
        let (watcher, mut rx) = engine.connect();
        engine.handle_join(&watcher, "trip-42").unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                let (c, _rx) = engine.connect();
                engine.handle_join(&c, "trip-42").unwrap();
                for j in 0..10 {
                    engine
                        .handle_message(&c, "trip-42", "usr_a", &format!("{i}-{j}"))
                        .await
                        .unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let got: Vec<i64> = delivered(&mut rx).iter().map(|m| m.id).collect();
        let persisted: Vec<i64> = store.room_messages("trip-42").iter().map(|m| m.id).collect();
        assert_eq!(got.len(), 80);
        assert_eq!(got, persisted);
    }
}
