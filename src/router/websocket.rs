//! WebSocket update feed
//!
//! Pushes a runtime heartbeat snapshot to each connected client every five
//! seconds until the client goes away.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use serde_json::json;
use tracing::{debug, info};

use crate::registry::BotStatus;
use crate::system;

use super::AppState;

/// Heartbeat cadence
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("WebSocket client connected to update feed");

    loop {
        let payload = heartbeat(&state);
        if socket.send(Message::Text(payload.to_string())).await.is_err() {
            break;
        }

        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    // Clients only listen; anything else is ignored.
                    Some(Ok(_)) => {}
                }
            }
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
        }
    }

    debug!("WebSocket client disconnected from update feed");
}

fn heartbeat(state: &AppState) -> serde_json::Value {
    let stats = state.registry.get_registry_stats();
    let running: Vec<String> = state
        .registry
        .get_bots_by_status(BotStatus::Running)
        .into_iter()
        .map(|b| b.id)
        .collect();

    json!({
        "type": "heartbeat",
        "ts": system::timestamp(),
        "bots_total": stats.total_bots,
        "bots_running": running,
        "supervisor_enabled": state.supervisor.is_running(),
    })
}
