//! WebSocket endpoint for the push hub.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, warn};

use super::{ClientCommand, GroupKey, Hub};
use crate::router::AppState;

/// Keep-alive ping interval; tuned below common layer-7 proxy idle
/// timeouts.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// GET /ws - upgrades to the push-hub protocol.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone()))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut sink, mut stream) = socket.split();
    let (connection_id, mut outbound) = hub.connect();
    debug!(connection = %connection_id, "push hub client connected");

    // Outbound task: group fan-out plus keep-alive pings.
    let mut send_task = tokio::spawn(async move {
        let mut keepalive = interval(KEEPALIVE_INTERVAL);
        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                message = outbound.recv() => {
                    let Some(message) = message else { break };
                    let Ok(text) = serde_json::to_string(&message) else { continue };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound task: the subscription RPC layer.
    let hub_for_commands = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            let Message::Text(text) = message else { continue };
            match serde_json::from_str::<ClientCommand>(&text) {
                Ok(ClientCommand::JoinGroup {
                    entity_kind,
                    entity_id,
                }) => {
                    hub_for_commands.join(connection_id, GroupKey::Entity(entity_kind, entity_id));
                }
                Ok(ClientCommand::LeaveGroup {
                    entity_kind,
                    entity_id,
                }) => {
                    hub_for_commands.leave(connection_id, GroupKey::Entity(entity_kind, entity_id));
                }
                Ok(ClientCommand::JoinAllModelsGroup) => {
                    hub_for_commands.join(connection_id, GroupKey::AllModels);
                }
                Ok(ClientCommand::JoinJobsGroup) => {
                    hub_for_commands.join(connection_id, GroupKey::Jobs);
                }
                Err(e) => {
                    warn!(connection = %connection_id, "unparseable hub command: {}", e);
                }
            }
        }
    });

    // Whichever side closes first tears down the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(connection_id);
    debug!(connection = %connection_id, "push hub client disconnected");
}
