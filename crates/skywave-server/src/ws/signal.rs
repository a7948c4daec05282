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
    if state.hub.signal.subscriber_count() >= state.cfg.limits.signal_clients {
        return (StatusCode::TOO_MANY_REQUESTS, "too many signal clients").into_response();
    }
    ws.on_upgrade(|socket| handle(socket, state))
}

/// Binary-only spectrum batches. Inbound traffic is ignored so a noisy
/// client cannot disturb the display path.
async fn handle(socket: ws::WebSocket, state: Arc<AppState>) {
    let mut sub = state.hub.subscribe(ChannelKind::Signal);
    let client_id = sub.id;
    tracing::info!(client_id, "signal ws connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let send_task = tokio::spawn(async move {
        while let Some(payload) = sub.recv().await {
            let Payload::Binary(bytes) = payload else {
                continue;
            };
            if ws_sender.send(ws::Message::Binary(bytes.to_vec())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if matches!(msg, ws::Message::Close(_)) {
            break;
        }
    }

    state.hub.unsubscribe(ChannelKind::Signal, client_id);
    tracing::info!(client_id, "signal ws disconnected");
    send_task.abort();
}
