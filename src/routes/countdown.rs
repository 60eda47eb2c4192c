//! WebSocket feed of the remaining time of one attempt.
//!
//! Frames are `{"remaining": n}` once per period, then `{"expired": true}`
//! followed by the submission outcome, or `{"error": "..."}`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;
use crate::services::ticker::TickerReceiver;
use crate::AppState;

const FRAME_BUFFER: usize = 8;

#[axum::debug_handler]
pub async fn countdown(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let signals = state.countdown.open(attempt_id).await?;
    Ok(ws.on_upgrade(move |socket| relay(socket, state, attempt_id, signals)))
}

async fn relay(mut socket: WebSocket, state: AppState, attempt_id: Uuid, signals: TickerReceiver) {
    let (tx, mut frames) = mpsc::channel(FRAME_BUFFER);
    // Detached so an expiry submit finishes even if the client leaves.
    let feed = state.countdown.clone();
    tokio::spawn(async move { feed.pump(attempt_id, signals, tx).await });

    while let Some(frame) = frames.recv().await {
        if socket.send(Message::Text(frame.to_string())).await.is_err() {
            tracing::debug!(%attempt_id, "countdown socket closed");
            return;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}
