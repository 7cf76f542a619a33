//! Transport (§10.4): an axum WebSocket endpoint that turns socket frames
//! into the five Orchestrator events and turns Orchestrator/Pacer emissions
//! into socket frames. Holds no state-machine logic of its own — grounded on
//! the reference's `ws_chat_handler`/`handle_socket` split (`src/api/ws/chat/mod.rs`
//! in the teacher repo's sibling `mira` crate), adapted from that extracted
//! message-router style to this system's five-event surface.

pub mod connection;
pub mod messages;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;
use connection::Connection;
use messages::WsClientMessage;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
        "aiEnabled": state.ai_enabled(),
        "activeUsers": state.active_users().await,
    }))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// The sole session key is the UUID assigned here at accept time (§6) — no
/// client-supplied identifier is ever honored for state keying.
async fn handle_socket(socket: axum::extract::ws::WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let id = Uuid::new_v4();
    let (sender, mut receiver) = socket.split();
    let connection = Connection::new(sender);
    state.channels.register(id, connection.clone()).await;

    info!(connection = %id, %addr, "websocket connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => handle_text(&state, id, &text).await,
            Ok(Message::Close(_)) => {
                info!(connection = %id, "client closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection = %id, error = %e, "websocket error");
                break;
            }
        }
    }

    state.orchestrator.disconnect(id).await;
    info!(connection = %id, "websocket cleaned up");
}

async fn handle_text(state: &Arc<AppState>, id: Uuid, text: &str) {
    let client_message = match serde_json::from_str::<WsClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(connection = %id, error = %e, "failed to parse client message");
            if let Some(channel) = state.channels.get(id).await {
                channel.send_error("invalid message format", Some(e.to_string())).await;
            }
            return;
        }
    };

    match client_message {
        WsClientMessage::UserMessage { message } => {
            state.orchestrator.user_message(id, message).await;
        }
        WsClientMessage::TypingStatus { is_typing } => {
            state.orchestrator.typing_status(id, is_typing).await;
        }
        WsClientMessage::StopAiResponse {} => {
            state.orchestrator.stop(id).await;
        }
        WsClientMessage::EndChat {} => {
            state.orchestrator.end_chat(id).await;
        }
        WsClientMessage::SetChatMode { mode, initial_message } => {
            info!(connection = %id, ?mode, "chat mode switched");
            if let Some(message) = initial_message {
                state.orchestrator.user_message(id, message).await;
            }
        }
    }
}
