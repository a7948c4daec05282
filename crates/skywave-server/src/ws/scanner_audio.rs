use crate::fanout::{ChannelKind, Payload};
use crate::state::AppState;
use axum::{
    extract::{ws, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if state.hub.scanner_audio.subscriber_count() >= state.cfg.limits.scanner_audio_clients {
        return (StatusCode::TOO_MANY_REQUESTS, "too many scanner audio clients").into_response();
    }
    ws.on_upgrade(|socket| handle(socket, state))
}

/// Raw f32 LE mono audio while the scanner is parked, interleaved with
/// small `scanner_meta` JSON updates.
async fn handle(socket: ws::WebSocket, state: Arc<AppState>) {
    let mut sub = state.hub.subscribe(ChannelKind::ScannerAudio);
    let client_id = sub.id;
    tracing::info!(client_id, "scanner audio ws connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let send_task = tokio::spawn(async move {
        while let Some(payload) = sub.recv().await {
            let msg = match payload {
                Payload::Json(text) => ws::Message::Text(text.as_ref().to_string()),
                Payload::Binary(bytes) => ws::Message::Binary(bytes.to_vec()),
            };
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if matches!(msg, ws::Message::Close(_)) {
            break;
        }
    }

    state.hub.unsubscribe(ChannelKind::ScannerAudio, client_id);
    tracing::info!(client_id, "scanner audio ws disconnected");
    send_task.abort();
}
