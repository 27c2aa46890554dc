use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::{actor, protocol};

/// Query parameters for WebSocket connection.
/// Auth is via query param ?token=JWT; `room_id` is optional and omitted for
/// private-chat-only connections.
#[derive(Debug, Deserialize)]
pub struct WsConnectQuery {
    pub token: String,
    #[serde(default)]
    pub room_id: Option<String>,
}

/// GET /ws?token=JWT&room_id=ROOM
///
/// Token failures upgrade and then close with 4001/4002 so that browser
/// clients can read the code. Room failures (unknown, full) are answered
/// with a plain HTTP error before any upgrade.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match jwt::validate_access_token(&state.jwt_secret, &params.token) {
        Ok(claims) => claims,
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (protocol::CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (protocol::CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(close_code, reason, "WebSocket auth failed");

            return ws.on_upgrade(move |mut socket| async move {
                let _ = socket.send(protocol::close_message(close_code, reason)).await;
            });
        }
    };

    let room_id = params.room_id.filter(|id| !id.is_empty());
    if let Some(room_id) = &room_id {
        if let Err(e) = state.dispatcher.check_admission(room_id).await {
            tracing::info!(
                user_id = claims.sub,
                room_id = %room_id,
                error = %e,
                "WebSocket admission refused"
            );
            return e.into_response();
        }
    }

    tracing::info!(
        user_id = claims.sub,
        room_id = room_id.as_deref().unwrap_or("-"),
        "WebSocket connection authenticated"
    );
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, claims.sub, room_id))
}
