//! REST endpoints for room lifecycle. All calls go through the dispatcher.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::room::RoomSummary;
use crate::auth::middleware::Claims;
use crate::error::ChatError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomSummary>,
}

/// GET /api/chat/rooms — List all rooms with their member counts.
pub async fn list_rooms(
    State(state): State<AppState>,
    _claims: Claims,
) -> Result<Json<RoomListResponse>, ChatError> {
    let rooms = state.dispatcher.list_rooms().await?;
    Ok(Json(RoomListResponse { rooms }))
}

/// POST /api/chat/rooms — Create a room owned by the caller.
pub async fn create_room(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomSummary>), ChatError> {
    let room = state.dispatcher.create_room(&req.name, claims.sub).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// DELETE /api/chat/rooms/{id} — Delete a room (creator only, never a default room).
pub async fn delete_room(
    State(state): State<AppState>,
    claims: Claims,
    Path(room_id): Path<String>,
) -> Result<StatusCode, ChatError> {
    state.dispatcher.delete_room(&room_id, claims.sub).await?;
    Ok(StatusCode::OK)
}
