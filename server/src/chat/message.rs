use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RoomId, UserId};

/// A chat message as it travels over the wire and through the dispatcher.
///
/// `from`, `created_at` and `room_id` are always stamped by the server; clients
/// only choose `to` and `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "from", default)]
    pub from_id: UserId,
    /// Private recipient, 0 for room messages.
    #[serde(rename = "to", default)]
    pub to_id: UserId,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Empty for private messages.
    #[serde(default)]
    pub room_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_avatar: String,
}

/// Where the dispatcher should deliver a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget<'a> {
    User(UserId),
    Room(&'a str),
    Nowhere,
}

impl ChatMessage {
    /// Build a message on behalf of a connected session.
    ///
    /// A non-zero `to` makes the message private, in which case the sender's
    /// room is not attached.
    pub fn from_session(
        from_id: UserId,
        session_room: Option<&RoomId>,
        to_id: UserId,
        content: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        let room_id = if to_id == 0 {
            session_room.cloned().unwrap_or_default()
        } else {
            String::new()
        };
        Self {
            from_id,
            to_id,
            content,
            created_at,
            room_id,
            user_name: String::new(),
            user_avatar: String::new(),
        }
    }

    pub fn target(&self) -> RouteTarget<'_> {
        if self.to_id != 0 {
            RouteTarget::User(self.to_id)
        } else if !self.room_id.is_empty() {
            RouteTarget::Room(&self.room_id)
        } else {
            RouteTarget::Nowhere
        }
    }

    pub fn is_private(&self) -> bool {
        self.to_id != 0
    }
}

/// The part of an inbound frame the server honours.
///
/// Any `from`, `created_at` or `room_id` a client sends is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub to: UserId,
    #[serde(default)]
    pub content: String,
}
