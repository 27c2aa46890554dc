//! REST endpoints for message history, served by the message store.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::store::{Conversation, StoredMessage};
use super::UserId;
use crate::auth::middleware::Claims;
use crate::error::ChatError;
use crate::state::AppState;

/// Default page size for message history.
pub const DEFAULT_LIMIT: usize = 30;
/// Maximum page size for message history.
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PrivateHistoryQuery {
    pub target_user_id: UserId,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
}

/// Missing, malformed or out-of-range limits fall back to the default
/// rather than rejecting the request.
pub fn effective_limit(limit: Option<&str>) -> usize {
    match limit.map(|l| l.trim().parse::<i64>()) {
        Some(Ok(l)) if (1..=MAX_LIMIT as i64).contains(&l) => l as usize,
        _ => DEFAULT_LIMIT,
    }
}

/// GET /api/chat/rooms/{id}/messages?limit=N
pub async fn room_history(
    State(state): State<AppState>,
    _claims: Claims,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ChatError> {
    let messages = state
        .store
        .room_history(&room_id, effective_limit(query.limit.as_deref()))
        .await?;
    Ok(Json(HistoryResponse { messages }))
}

/// GET /api/chat/private/messages?target_user_id=U&limit=N
pub async fn private_history(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<PrivateHistoryQuery>,
) -> Result<Json<HistoryResponse>, ChatError> {
    if query.target_user_id == 0 {
        return Err(ChatError::InvalidInput("target_user_id is required".into()));
    }
    let limit = effective_limit(query.limit.as_deref());
    let messages = state
        .store
        .private_history(claims.sub, query.target_user_id, limit)
        .await?;
    Ok(Json(HistoryResponse { messages }))
}

/// GET /api/chat/conversations — Private conversation partners, most recent first.
pub async fn conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<ConversationsResponse>, ChatError> {
    let conversations = state.store.conversations(claims.sub).await?;
    tracing::debug!(user_id = claims.sub, count = conversations.len(), "Conversations listed");
    Ok(Json(ConversationsResponse { conversations }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit() {
        assert_eq!(effective_limit(None), DEFAULT_LIMIT);
        assert_eq!(effective_limit(Some("0")), DEFAULT_LIMIT);
        assert_eq!(effective_limit(Some("101")), DEFAULT_LIMIT);
        assert_eq!(effective_limit(Some("1")), 1);
        assert_eq!(effective_limit(Some("100")), 100);
        assert_eq!(effective_limit(Some(" 20 ")), 20);
    }

    #[test]
    fn test_effective_limit_ignores_malformed_values() {
        assert_eq!(effective_limit(Some("-5")), DEFAULT_LIMIT);
        assert_eq!(effective_limit(Some("abc")), DEFAULT_LIMIT);
        assert_eq!(effective_limit(Some("")), DEFAULT_LIMIT);
        assert_eq!(effective_limit(Some("99999999999999999999")), DEFAULT_LIMIT);
    }
}
