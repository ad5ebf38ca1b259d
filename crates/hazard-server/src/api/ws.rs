//! WebSocket change feed for peer instances.
use crate::ports::{ChangeFeed, ChangeKind, PRESENCE_TABLE};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize, Default)]
pub struct FeedQuery {
    table: Option<String>,
}

/// Handler for `/v1/feed` connections.
pub async fn feed_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<FeedQuery>,
) -> axum::response::Response {
    let table = params.table.unwrap_or_else(|| PRESENCE_TABLE.to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, table))
        .into_response()
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, table: String) {
    let mut events = match state.feed().subscribe(&table, &ChangeKind::ALL).await {
        Ok(events) => events,
        Err(err) => {
            tracing::warn!("Feed subscription failed: {}", err);
            return;
        }
    };

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else {
                    break;
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!("Failed to encode change event: {}", err);
                        continue;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
        }
    }
}
