use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_common::ConnectionId;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::store::StoreError;

// ---------------------------------------------------------------------------
// Relay errors
// ---------------------------------------------------------------------------

/// Failure of a single relay operation. Each variant affects only the
/// connection that issued the operation.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("connection is not a member of room {0}")]
    NotInRoom(String),
    #[error("message body is empty")]
    EmptyMessage,
    #[error("message body exceeds {max} characters")]
    MessageTooLong { max: usize },
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("failed to persist message: {0}")]
    Persistence(#[source] StoreError),
}

impl RelayError {
    /// Wire code sent to the client in an ERROR event.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::NotInRoom(_) => "NOT_IN_ROOM",
            RelayError::EmptyMessage => "EMPTY_MESSAGE",
            RelayError::MessageTooLong { .. } => "MESSAGE_TOO_LONG",
            RelayError::UnknownConnection(_) => "UNKNOWN_CONNECTION",
            RelayError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP errors
// ---------------------------------------------------------------------------

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(?err, "message store error");
        Self::internal("An internal error occurred")
    }
}
