use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::chat::{RoomId, UserId};

/// Failures surfaced by the chat core.
///
/// Room lifecycle errors are returned to the caller that triggered them.
/// Routing never returns these to a sender: delivery problems are absorbed
/// inside the dispatcher.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("only the creator of room {0} can delete it")]
    PermissionDenied(RoomId),

    #[error("room {0} is a default room and cannot be deleted")]
    Protected(RoomId),

    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("room limit reached (at most {0} rooms)")]
    TooManyRooms(usize),

    #[error("{0}")]
    InvalidInput(String),

    #[error("user {0} is not connected")]
    Disconnected(UserId),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("message store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("message store lock poisoned")]
    StoreLock,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("chat dispatcher is not running")]
    DispatcherGone,
}

impl ChatError {
    /// True for the two capacity conditions (room full, room count at maximum).
    pub fn is_capacity(&self) -> bool {
        matches!(self, ChatError::RoomFull(_) | ChatError::TooManyRooms(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::RoomNotFound(_) | ChatError::Disconnected(_) => StatusCode::NOT_FOUND,
            ChatError::PermissionDenied(_) | ChatError::Protected(_) | ChatError::RoomFull(_) => {
                StatusCode::FORBIDDEN
            }
            ChatError::TooManyRooms(_) => StatusCode::CONFLICT,
            ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ChatError::Transport(_) => StatusCode::BAD_GATEWAY,
            ChatError::DispatcherGone => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Store(_) | ChatError::StoreLock | ChatError::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Chat request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
