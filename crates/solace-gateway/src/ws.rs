//! WebSocket endpoint: one session per connection.
//!
//! The reader half decodes frames into the session mailbox; the writer
//! half drains the session's outbound sequence. The session actor never
//! sees the socket.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use solace_session::{spawn_session, InboundFrame};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct WsQuery {
    /// Stable user identity; anonymous connections get a throwaway id.
    pub user_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let user_id = query
        .user_id
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| format!("anon-{}", Uuid::new_v4()));
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    info!(target: "solace::gateway", user = %user_id, "websocket connected");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut outbound, actor) = spawn_session(&user_id, state.session_deps());

    // Writer: session outbound sequence -> socket, in order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "solace::gateway", "outbound frame serialization failed: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader: socket -> session mailbox.
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => handle.send_frame(frame).await,
                Err(e) => {
                    debug!(target: "solace::gateway", user = %user_id, "malformed frame: {e}");
                    handle
                        .report_protocol_error(format!("malformed frame: {e}"))
                        .await;
                }
            },
            Ok(Message::Binary(bytes)) => {
                // Binary frames are raw PCM without the JSON envelope.
                use base64::Engine;
                let audio_data = base64::engine::general_purpose::STANDARD.encode(bytes);
                handle
                    .send_frame(InboundFrame::AudioChunk { audio_data })
                    .await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    handle.detach().await;
    let _ = actor.await;
    writer.abort();
    info!(target: "solace::gateway", user = %user_id, "websocket closed");
}
