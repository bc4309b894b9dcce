//! Presence snapshot for observability.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/presence", get(presence))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresenceResponse {
    /// Live gateway connections, identified or not.
    pub connections: usize,
    /// Distinct identities with at least one live connection.
    pub identities: Vec<String>,
    /// Rooms with at least one member.
    pub rooms: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/presence",
    tag = "Presence",
    responses((status = 200, description = "Who is connected", body = PresenceResponse)),
)]
pub async fn presence(State(state): State<AppState>) -> Json<PresenceResponse> {
    let presence = state.relay.presence();
    Json(PresenceResponse {
        connections: presence.connection_count(),
        identities: presence.online_identities(),
        rooms: state.relay.rooms().room_count(),
    })
}
