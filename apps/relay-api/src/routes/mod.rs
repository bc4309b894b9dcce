pub mod health;
pub mod messages;
pub mod presence;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest("/api/v1", messages::router().merge(presence::router()))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        messages::list_messages,
        presence::presence,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::models::message::ChatMessage,
            health::HealthResponse,
            messages::ListMessagesResponse,
            presence::PresenceResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Messages", description = "Room message history"),
        (name = "Presence", description = "Connected users"),
    )
)]
pub struct ApiDoc;
