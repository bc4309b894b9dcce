//! Gateway wire format: `{"t": EVENT_NAME, "d": payload}` JSON text frames.

use relay_common::ConnectionId;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::models::message::ChatMessage;

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
    Join(JoinPayload),
    Leave(LeavePayload),
    Message(MessagePayload),
    Heartbeat(HeartbeatPayload),
}

#[derive(Debug, Deserialize)]
pub struct JoinPayload {
    pub room_id: String,
    /// Identity of the user behind the connection, recorded for presence.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeavePayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagePayload {
    pub room_id: String,
    pub sender_id: String,
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "d", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    Ready {
        connection_id: ConnectionId,
        heartbeat_interval: u64,
    },
    Joined {
        room_id: String,
    },
    Left {
        room_id: String,
    },
    MessageDelivered(ChatMessage),
    Error {
        code: String,
        message: String,
    },
    HeartbeatAck {
        ack: u64,
    },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Name of the event as sent in `t`.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Ready { .. } => "READY",
            ServerEvent::Joined { .. } => "JOINED",
            ServerEvent::Left { .. } => "LEFT",
            ServerEvent::MessageDelivered(_) => "MESSAGE_DELIVERED",
            ServerEvent::Error { .. } => "ERROR",
            ServerEvent::HeartbeatAck { .. } => "HEARTBEAT_ACK",
        }
    }
}

impl From<&RelayError> for ServerEvent {
    fn from(err: &RelayError) -> Self {
        ServerEvent::error(err.code(), err.to_string())
    }
}
