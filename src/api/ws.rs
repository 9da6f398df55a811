// =============================================================================
// WebSocket transport — thin mount over the realtime fan-out hub (C12)
// =============================================================================
//
// One upgrade handler for all four named topics, mounted at
// `/api/v1/ws/:topic`. The handler validates the `?token=` query parameter
// for every topic except `market_data` (the hub's only unauthenticated
// topic), subscribes the new connection, then runs two concurrent loops via
// `tokio::select!`: forward hub-pushed envelopes to the socket, and drain
// client frames (Ping/Pong/Close) until disconnect.
// =============================================================================

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::app_state::AppState;
use crate::realtime::Topic;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Axum handler for the WebSocket upgrade request at `/api/v1/ws/:topic`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let Some(topic) = Topic::parse(&topic) else {
        return (axum::http::StatusCode::NOT_FOUND, "unknown realtime topic").into_response();
    };

    if topic.requires_auth() {
        let token = query.token.unwrap_or_default();
        if !validate_token(&token) {
            warn!(?topic, "realtime connection rejected: invalid token");
            return (axum::http::StatusCode::FORBIDDEN, "invalid or missing token").into_response();
        }
    }

    info!(?topic, "realtime connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_connection(socket, state, topic)).into_response()
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, topic: Topic) {
    let (conn_id, mut rx) = state.hub.register(None);
    state.hub.subscribe(conn_id, topic);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            envelope = rx.recv() => {
                let Some(envelope) = envelope else {
                    debug!(%conn_id, "realtime outbound channel closed");
                    break;
                };
                match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            debug!(%conn_id, error = %e, "realtime send failed — disconnecting");
                            break;
                        }
                    }
                    Err(e) => warn!(%conn_id, error = %e, "failed to serialize realtime envelope"),
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%conn_id, "realtime connection closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%conn_id, error = %e, "realtime receive error — disconnecting");
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(conn_id);
}
