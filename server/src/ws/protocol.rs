use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};

use crate::chat::message::{ChatMessage, InboundFrame};
use crate::chat::profile::ProfileDirectory;
use crate::chat::{RoomId, UserId};

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid
/// 4003 = room unavailable (filled up or deleted between admission and register)
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_ROOM_UNAVAILABLE: u16 = 4003;

/// Normal closure, sent when the server tears a session down.
pub const CLOSE_NORMAL: u16 = 1000;
/// Going away, sent when the peer stops answering pings.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Decode a client text frame.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, serde_json::Error> {
    serde_json::from_str(text)
}

/// Turn a decoded frame into a routable message on behalf of the session.
///
/// Sender, room and timestamp come from the server; the profile directory
/// supplies name and avatar when it knows the sender.
pub fn stamp(
    frame: InboundFrame,
    user_id: UserId,
    room_id: Option<&RoomId>,
    profiles: &ProfileDirectory,
    now: DateTime<Utc>,
) -> ChatMessage {
    let mut message = ChatMessage::from_session(user_id, room_id, frame.to, frame.content, now);
    profiles.enrich(&mut message);
    message
}

pub fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::RouteTarget;
    use crate::chat::profile::Profile;

    #[test]
    fn test_decode_minimal_frame() {
        let frame = decode_inbound(r#"{"content":"hello"}"#).unwrap();
        assert_eq!(frame.to, 0);
        assert_eq!(frame.content, "hello");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_inbound("not json").is_err());
        assert!(decode_inbound(r#"{"to":"abc"}"#).is_err());
    }

    #[test]
    fn test_stamp_overrides_client_claims() {
        let profiles = ProfileDirectory::new();
        profiles.set(
            5,
            Profile {
                name: "Grace".into(),
                avatar: String::new(),
            },
        );
        let frame = decode_inbound(r#"{"from":1,"to":0,"content":"hi","room_id":"room-9"}"#)
            .unwrap();
        let room = "room-2".to_string();
        let now = Utc::now();
        let msg = stamp(frame, 5, Some(&room), &profiles, now);

        assert_eq!(msg.from_id, 5);
        assert_eq!(msg.created_at, now);
        assert_eq!(msg.target(), RouteTarget::Room("room-2"));
        assert_eq!(msg.user_name, "Grace");
    }

    #[test]
    fn test_close_message_carries_code() {
        match close_message(CLOSE_ROOM_UNAVAILABLE, "room is full") {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 4003);
                assert_eq!(frame.reason.as_str(), "room is full");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
