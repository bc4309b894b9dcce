//! Append-only chat message persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::PoolError;
use parking_lot::Mutex;
use relay_common::{ClockError, SnowflakeGenerator};

use crate::db::pool::DbPool;
use crate::db::schema::chat_messages;
use crate::models::message::{AppendMessage, ChatMessage, NewChatMessage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("message id generation failed: {0}")]
    Clock(#[from] ClockError),
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of chat messages keyed by room.
///
/// `append` never mutates or deletes existing records. A returned error means
/// nothing was written.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, message: AppendMessage) -> Result<ChatMessage, StoreError>;

    /// Up to `limit` messages of a room older than `before` (a message id),
    /// returned oldest first.
    async fn history(
        &self,
        room_id: &str,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

pub struct PgMessageStore {
    db: DbPool,
    ids: Arc<SnowflakeGenerator>,
}

impl PgMessageStore {
    pub fn new(db: DbPool, ids: Arc<SnowflakeGenerator>) -> Self {
        Self { db, ids }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: AppendMessage) -> Result<ChatMessage, StoreError> {
        let mut conn = self.db.get().await?;
        let id = self.ids.generate()?;

        let row: ChatMessage = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(chat_messages::table)
                .values(NewChatMessage {
                    id,
                    room_id: &message.room_id,
                    sender_id: &message.sender_id,
                    sender_name: &message.sender_name,
                    body: &message.body,
                    created_at: Utc::now(),
                })
                .returning(ChatMessage::as_returning()),
            &mut conn,
        )
        .await?;

        Ok(row)
    }

    async fn history(
        &self,
        room_id: &str,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let mut conn = self.db.get().await?;

        let mut query = chat_messages::table
            .filter(chat_messages::room_id.eq(room_id))
            .into_boxed::<diesel::pg::Pg>();
        if let Some(before) = before {
            query = query.filter(chat_messages::id.lt(before));
        }

        let mut rows: Vec<ChatMessage> = diesel_async::RunQueryDsl::load(
            query
                .order(chat_messages::id.desc())
                .limit(limit)
                .select(ChatMessage::as_select()),
            &mut conn,
        )
        .await?;

        rows.reverse();
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests / database-less runs)
// ---------------------------------------------------------------------------

pub struct MemoryMessageStore {
    ids: SnowflakeGenerator,
    messages: Mutex<Vec<ChatMessage>>,
    unavailable: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            ids: SnowflakeGenerator::new(0),
            messages: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `append` fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored messages of a room in append order.
    pub fn room_messages(&self, room_id: &str) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: AppendMessage) -> Result<ChatMessage, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }

        // id and push happen under one lock so append order matches id order.
        let mut messages = self.messages.lock();
        let row = ChatMessage {
            id: self.ids.generate()?,
            room_id: message.room_id,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            body: message.body,
            created_at: Utc::now(),
        };
        messages.push(row.clone());
        Ok(row)
    }

    async fn history(
        &self,
        room_id: &str,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.lock();
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut page: Vec<ChatMessage> = messages
            .iter()
            .rev()
            .filter(|m| m.room_id == room_id)
            .filter(|m| before.map_or(true, |b| m.id < b))
            .take(limit)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }
}
