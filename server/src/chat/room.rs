//! Room state and the room registry.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{RoomId, UserId};
use crate::error::ChatError;

/// Creator id used for rooms seeded at startup.
pub const SYSTEM_CREATOR: UserId = 0;

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub max_members: usize,
    /// Default rooms are never deleted, by users or by the sweeper.
    pub permanent: bool,
    members: HashSet<UserId>,
}

impl Room {
    fn new(
        id: RoomId,
        name: String,
        creator_id: UserId,
        max_members: usize,
        permanent: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            creator_id,
            created_at: now,
            last_active: now,
            max_members,
            permanent,
            members: HashSet::new(),
        }
    }

    pub fn members(&self) -> impl Iterator<Item = UserId> + '_ {
        self.members.iter().copied()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_members
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active = now;
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            user_count: self.members.len(),
            max_users: self.max_members,
            created_at: self.created_at,
            creator_id: self.creator_id,
        }
    }
}

/// Read-only room descriptor returned to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub user_count: usize,
    pub max_users: usize,
    pub created_at: DateTime<Utc>,
    pub creator_id: UserId,
}

/// All rooms known to the dispatcher.
///
/// Membership here only records user ids; the sessions themselves live in the
/// presence directory.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    max_rooms: usize,
    room_capacity: usize,
}

impl RoomRegistry {
    /// `max_rooms` bounds user-created rooms; default rooms do not count.
    pub fn new(max_rooms: usize, room_capacity: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            max_rooms,
            room_capacity,
        }
    }

    /// Add a permanent room. Re-seeding an existing id is a no-op.
    pub fn seed_default(&mut self, id: &str, name: &str, now: DateTime<Utc>) {
        let capacity = self.room_capacity;
        self.rooms.entry(id.to_string()).or_insert_with(|| {
            Room::new(
                id.to_string(),
                name.to_string(),
                SYSTEM_CREATOR,
                capacity,
                true,
                now,
            )
        });
    }

    pub fn create(
        &mut self,
        name: &str,
        creator_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<&Room, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("room name cannot be empty".into()));
        }
        if self.custom_room_count() >= self.max_rooms {
            return Err(ChatError::TooManyRooms(self.max_rooms));
        }

        let id = format!("room-{}", Uuid::now_v7());
        let room = Room::new(
            id.clone(),
            name.to_string(),
            creator_id,
            self.room_capacity,
            false,
            now,
        );
        Ok(self.rooms.entry(id).or_insert(room))
    }

    pub fn get(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Room> {
        self.rooms.remove(id)
    }

    /// Whether a new session may join `id` right now.
    pub fn check_admission(&self, id: &str) -> Result<(), ChatError> {
        let room = self
            .rooms
            .get(id)
            .ok_or_else(|| ChatError::RoomNotFound(id.to_string()))?;
        if room.is_full() {
            return Err(ChatError::RoomFull(id.to_string()));
        }
        Ok(())
    }

    pub fn join(&mut self, id: &str, user_id: UserId, now: DateTime<Utc>) -> Result<(), ChatError> {
        let room = self
            .rooms
            .get_mut(id)
            .ok_or_else(|| ChatError::RoomNotFound(id.to_string()))?;
        if !room.members.contains(&user_id) && room.is_full() {
            return Err(ChatError::RoomFull(id.to_string()));
        }
        room.members.insert(user_id);
        room.touch(now);
        Ok(())
    }

    /// Remove a member. Returns false if the room or the member was absent.
    pub fn leave(&mut self, id: &str, user_id: UserId, now: DateTime<Utc>) -> bool {
        let Some(room) = self.rooms.get_mut(id) else {
            return false;
        };
        let removed = room.members.remove(&user_id);
        if removed {
            room.touch(now);
        }
        removed
    }

    /// Check that `requester_id` may delete room `id`.
    pub fn authorize_delete(&self, id: &str, requester_id: UserId) -> Result<&Room, ChatError> {
        let room = self
            .rooms
            .get(id)
            .ok_or_else(|| ChatError::RoomNotFound(id.to_string()))?;
        if room.permanent {
            return Err(ChatError::Protected(id.to_string()));
        }
        if room.creator_id != requester_id {
            return Err(ChatError::PermissionDenied(id.to_string()));
        }
        Ok(room)
    }

    /// Snapshot of every room, oldest first.
    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self.rooms.values().map(Room::summary).collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rooms
    }

    /// Non-permanent, empty rooms idle for longer than `retention`.
    pub fn idle_rooms(&self, now: DateTime<Utc>, retention: TimeDelta) -> Vec<RoomId> {
        self.rooms
            .values()
            .filter(|room| {
                !room.permanent && room.members.is_empty() && now - room.last_active > retention
            })
            .map(|room| room.id.clone())
            .collect()
    }

    pub fn custom_room_count(&self) -> usize {
        self.rooms.values().filter(|room| !room.permanent).count()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
