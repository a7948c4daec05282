use crate::control;
use crate::fanout::{ChannelKind, Payload};
use crate::state::AppState;
use axum::{
    extract::{ws, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use skywave_core::protocol::{event_json, CommandOutcome, ControlCommand, Event};
use std::sync::Arc;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if state.hub.main.subscriber_count() >= state.cfg.limits.main_clients {
        return (StatusCode::TOO_MANY_REQUESTS, "too many events clients").into_response();
    }
    ws.on_upgrade(|socket| handle(socket, state))
}

/// The main channel: JSON events plus tagged receiver-audio binary out,
/// control commands in. Command replies are merged ahead of broadcast
/// traffic on the same socket.
async fn handle(socket: ws::WebSocket, state: Arc<AppState>) {
    let mut sub = state.hub.subscribe(ChannelKind::Main);
    let client_id = sub.id;
    tracing::info!(client_id, "events ws connected");

    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::channel::<String>(8);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let initial = event_json(&Event::ScannerState {
        status: state.scanner.status(),
    });
    if ws_sender.send(ws::Message::Text(initial)).await.is_err() {
        state.hub.unsubscribe(ChannelKind::Main, client_id);
        return;
    }

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                Some(reply) = reply_rx.recv() => {
                    if ws_sender.send(ws::Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
                payload = sub.recv() => {
                    let Some(payload) = payload else { break };
                    let msg = match payload {
                        Payload::Json(text) => ws::Message::Text(text.as_ref().to_string()),
                        Payload::Binary(bytes) => ws::Message::Binary(bytes.to_vec()),
                    };
                    if ws_sender.send(msg).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            ws::Message::Text(txt) => {
                if txt.len() > 4096 {
                    continue;
                }
                let Ok(cmd) = serde_json::from_str::<ControlCommand>(&txt) else {
                    tracing::debug!(client_id, "ignoring malformed command");
                    continue;
                };
                let cmd_state = state.clone();
                let outcome =
                    tokio::task::spawn_blocking(move || control::handle_command(&cmd_state, cmd))
                        .await
                        .unwrap_or_else(|_| {
                            CommandOutcome::failure("VALIDATION", "command execution failed")
                        });
                let reply = serde_json::to_string(&outcome).unwrap_or_else(|_| "{}".to_string());
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
            ws::Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.unsubscribe(ChannelKind::Main, client_id);
    tracing::info!(client_id, "events ws disconnected");
    send_task.abort();
}
