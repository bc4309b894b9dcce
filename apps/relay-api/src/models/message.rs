use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::chat_messages;

/// A persisted chat message. Immutable once written.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = chat_messages)]
pub struct ChatMessage {
    #[serde(serialize_with = "serialize_id")]
    #[schema(value_type = String)]
    pub id: i64,
    pub room_id: String,
    pub sender_id: String,
    /// Display name captured when the message was sent.
    pub sender_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the relay when appending a message. The store assigns
/// the id and timestamp.
#[derive(Debug, Clone)]
pub struct AppendMessage {
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct NewChatMessage<'a> {
    pub id: i64,
    pub room_id: &'a str,
    pub sender_id: &'a str,
    pub sender_name: &'a str,
    pub body: &'a str,
    pub created_at: DateTime<Utc>,
}

// Snowflakes exceed JavaScript's safe integer range.
fn serialize_id<S: serde::Serializer>(id: &i64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&id.to_string())
}
