//! Display-name and avatar lookup used to enrich outbound messages.
//!
//! In-memory directory (DashMap) keyed by user id. The surrounding
//! application owns the real profiles and pushes them here through
//! `PUT /api/chat/profile`.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::message::ChatMessage;
use super::UserId;
use crate::auth::middleware::Claims;
use crate::error::ChatError;
use crate::state::AppState;

/// Longest display name accepted (chars).
const MAX_NAME_LENGTH: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileDirectory {
    profiles: Arc<DashMap<UserId, Profile>>,
}

impl ProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: UserId, profile: Profile) {
        self.profiles.insert(user_id, profile);
    }

    pub fn get(&self, user_id: UserId) -> Option<Profile> {
        self.profiles.get(&user_id).map(|entry| entry.value().clone())
    }

    /// Fill in the sender's name and avatar, if known.
    pub fn enrich(&self, message: &mut ChatMessage) {
        if let Some(entry) = self.profiles.get(&message.from_id) {
            message.user_name = entry.name.clone();
            message.user_avatar = entry.avatar.clone();
        }
    }
}

/// PUT /api/chat/profile — Set the caller's display name and avatar. JWT auth required.
pub async fn set_profile(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<Profile>,
) -> Result<StatusCode, ChatError> {
    let name = body.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(ChatError::InvalidInput(format!(
            "display name must be 1-{MAX_NAME_LENGTH} characters"
        )));
    }
    state.profiles.set(
        claims.sub,
        Profile {
            name,
            avatar: body.avatar,
        },
    );
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_enrich_known_sender() {
        let dir = ProfileDirectory::new();
        dir.set(
            4,
            Profile {
                name: "Ada".into(),
                avatar: "/avatars/4.png".into(),
            },
        );
        let mut msg = ChatMessage::from_session(4, None, 5, "hey".into(), Utc::now());
        dir.enrich(&mut msg);
        assert_eq!(msg.user_name, "Ada");
        assert_eq!(msg.user_avatar, "/avatars/4.png");
    }

    #[test]
    fn test_enrich_unknown_sender_leaves_message_alone() {
        let dir = ProfileDirectory::new();
        let mut msg = ChatMessage::from_session(4, None, 5, "hey".into(), Utc::now());
        dir.enrich(&mut msg);
        assert!(msg.user_name.is_empty());
        assert!(dir.get(4).is_none());
    }
}
