//! WebSocket endpoint carrying chat events.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::chat::auth::Handshake;
use crate::chat::core::ids::ConnectionId;
use crate::chat::routing::{ClientEvent, ConnectionContext, ServerEvent};

use super::routes::bearer_token;
use super::state::AppState;

/// Handshake parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    /// Bearer token, for clients that cannot set headers.
    pub token: Option<String>,
    /// Anonymous correlation id kept by the client across reconnects.
    pub anonymous_id: Option<String>,
}

/// Upgrade handler. Identity is resolved before the upgrade is accepted.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    let handshake = Handshake {
        token: params.token.or_else(|| bearer_token(&headers)),
        anonymous_id: params.anonymous_id,
    };

    let connection_id = ConnectionId::new();
    let ctx = match state.gate.resolve(connection_id, &handshake) {
        Ok(actor) => ConnectionContext::new(connection_id, actor),
        Err(err) => {
            warn!(%err, "Rejected socket handshake");
            return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, ctx))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, ctx: ConnectionContext) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.router.connect(&ctx, outbound_tx);

    let send_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    error!(%err, event = event.name(), "Failed to serialize event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(connection = %ctx.id, %err, "WebSocket error");
                break;
            }
        };

        match serde_json::from_str::<ClientEvent>(text.as_str()) {
            Ok(event) => state.router.handle(&ctx, event).await,
            Err(err) => state.router.reject_malformed(&ctx, &err.to_string()),
        }
    }

    state.router.disconnect(&ctx);
    send_task.abort();
}
