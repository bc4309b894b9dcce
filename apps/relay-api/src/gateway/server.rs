//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use relay_common::ConnectionId;
use tokio::time;

use crate::AppState;

use super::engine::RelayEngine;
use super::events::{ClientEvent, ServerEvent};

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Floor for the heartbeat deadline; `time::interval` rejects a zero period.
const MIN_HEARTBEAT_DEADLINE: Duration = Duration::from_millis(1);

type WsSink = SplitSink<WebSocket, Message>;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let engine = state.relay.clone();
    let (connection_id, mut outbound) = engine.connect();
    let _cleanup = DisconnectGuard {
        engine: engine.clone(),
        connection_id: connection_id.clone(),
    };
    let (mut ws_tx, mut ws_rx) = socket.split();

    engine.send_to(
        &connection_id,
        ServerEvent::Ready {
            connection_id: connection_id.clone(),
            heartbeat_interval: state.config.heartbeat_interval_ms,
        },
    );

    let mut heartbeat_timer = time::interval(heartbeat_deadline(state.config.heartbeat_interval_ms));
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_activity = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        got_activity = true;
                        let value: serde_json::Value = match serde_json::from_str(&text) {
                            Ok(v) => v,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };
                        match serde_json::from_value::<ClientEvent>(value) {
                            Ok(event) => dispatch(&engine, &connection_id, event).await,
                            Err(err) => {
                                engine.send_to(
                                    &connection_id,
                                    ServerEvent::error("INVALID_PAYLOAD", err.to_string()),
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        got_activity = true;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, %connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            Some(event) = outbound.recv() => {
                let json = match serde_json::to_string(event.as_ref()) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::error!(?err, event = event.name(), "failed to encode event");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            _ = heartbeat_timer.tick() => {
                if !got_activity {
                    tracing::debug!(%connection_id, "heartbeat timeout, closing connection");
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_activity = false;
            }
        }
    }
}

/// Clients must show activity within 1.5× the advertised interval.
fn heartbeat_deadline(interval_ms: u64) -> Duration {
    Duration::from_millis(interval_ms.saturating_mul(3) / 2).max(MIN_HEARTBEAT_DEADLINE)
}

/// Removes the connection from the relay when the connection task ends,
/// whether the loop exits normally or unwinds.
struct DisconnectGuard {
    engine: RelayEngine,
    connection_id: ConnectionId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.engine.handle_disconnect(&self.connection_id);
    }
}

/// Apply one inbound event. Failures are reported to this connection only.
async fn dispatch(engine: &RelayEngine, connection_id: &ConnectionId, event: ClientEvent) {
    match event {
        ClientEvent::Join(payload) => {
            if let Some(user_id) = payload.user_id.as_deref() {
                engine.identify(connection_id, user_id);
            }
            match engine.handle_join(connection_id, &payload.room_id) {
                Ok(_) => {
                    engine.send_to(connection_id, ServerEvent::Joined { room_id: payload.room_id });
                }
                Err(err) => {
                    engine.send_to(connection_id, ServerEvent::from(&err));
                }
            }
        }
        ClientEvent::Leave(payload) => {
            engine.handle_leave(connection_id, &payload.room_id);
            engine.send_to(connection_id, ServerEvent::Left { room_id: payload.room_id });
        }
        ClientEvent::Message(payload) => {
            if let Err(err) = engine
                .handle_message(connection_id, &payload.room_id, &payload.sender_id, &payload.body)
                .await
            {
                tracing::debug!(%connection_id, room_id = %payload.room_id, code = err.code(), "message rejected");
                engine.send_to(connection_id, ServerEvent::from(&err));
            }
        }
        ClientEvent::Heartbeat(payload) => {
            engine.send_to(connection_id, ServerEvent::HeartbeatAck { ack: payload.seq });
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
