//! Who is online: the user id to live session map owned by the dispatcher.

use std::collections::HashMap;

use super::session::{ConnectionId, Session};
use super::UserId;

/// Live user → session mapping used for private delivery.
///
/// Holds the only strong reference to each session's outbound queue, so a
/// session removed from here is a closed session.
#[derive(Debug, Default)]
pub struct PresenceDirectory {
    sessions: HashMap<UserId, Session>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, returning the one it replaced for the same user.
    pub fn insert(&mut self, session: Session) -> Option<Session> {
        self.sessions.insert(session.user_id, session)
    }

    pub fn get(&self, user_id: UserId) -> Option<&Session> {
        self.sessions.get(&user_id)
    }

    /// Remove the user's session only if it is the given connection.
    /// A stale connection id leaves a newer session untouched.
    pub fn remove_connection(
        &mut self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Option<Session> {
        match self.sessions.get(&user_id) {
            Some(s) if s.connection_id == connection_id => self.sessions.remove(&user_id),
            _ => None,
        }
    }

    pub fn remove(&mut self, user_id: UserId) -> Option<Session> {
        self.sessions.remove(&user_id)
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.sessions.contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
