//! Room message history.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, ApiErrorBody};
use crate::models::message::ChatMessage;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/rooms/{room_id}/messages", get(list_messages))
}

// ---------------------------------------------------------------------------
// GET /api/v1/rooms/{room_id}/messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListMessagesParams {
    /// Only return messages older than this message id.
    pub before: Option<String>,
    /// Page size, 1..=100 (default 50).
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListMessagesResponse {
    pub data: Vec<ChatMessage>,
    pub has_more: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/messages",
    tag = "Messages",
    params(
        ("room_id" = String, Path, description = "Room ID"),
        ListMessagesParams,
    ),
    responses(
        (status = 200, description = "Messages, oldest first", body = ListMessagesResponse),
        (status = 400, description = "Invalid cursor", body = ApiErrorBody),
    ),
)]
pub async fn list_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<ListMessagesParams>,
) -> Result<Json<ListMessagesResponse>, ApiError> {
    let before = params
        .before
        .as_deref()
        .map(|s| s.parse::<i64>())
        .transpose()
        .map_err(|_| ApiError::bad_request("Invalid message ID"))?;
    let limit = params.limit.unwrap_or(50).clamp(1, 100);

    // One extra row tells us whether an older page exists.
    let mut data = state
        .relay
        .store()
        .history(&room_id, before, limit + 1)
        .await?;

    let has_more = data.len() as i64 > limit;
    if has_more {
        data.remove(0);
    }

    Ok(Json(ListMessagesResponse { data, has_more }))
}
