//! The dispatcher actor.
//!
//! One task owns the [`RoomRegistry`] and the [`PresenceDirectory`]; every
//! registration, teardown, route and room lifecycle call is a [`Command`] on
//! a single channel, so all mutations are serialized without locks. The
//! actor never awaits on a client: fan-out uses `try_send` and a full queue
//! disconnects that one consumer.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot};

use super::message::{ChatMessage, RouteTarget};
use super::presence::PresenceDirectory;
use super::room::{RoomRegistry, RoomSummary};
use super::session::{ConnectionId, Delivery, Frame, Session};
use super::store::MessageStore;
use super::{RoomId, UserId};
use crate::config::ChatConfig;
use crate::error::ChatError;

/// What a single `route` call did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Frames enqueued.
    pub delivered: usize,
    /// Users disconnected because their queue was full or closed.
    pub dropped: Vec<UserId>,
}

pub struct Dispatcher {
    rooms: RoomRegistry,
    presence: PresenceDirectory,
    retention: TimeDelta,
}

impl Dispatcher {
    pub fn new(config: &ChatConfig) -> Self {
        let mut rooms = RoomRegistry::new(config.max_rooms, config.room_capacity);
        let now = Utc::now();
        for room in &config.default_rooms {
            rooms.seed_default(&room.id, &room.name, now);
        }
        Self {
            rooms,
            presence: PresenceDirectory::new(),
            // an unrepresentable window means rooms are never idle long enough
            retention: config.idle_retention().unwrap_or(TimeDelta::MAX),
        }
    }

    /// Start the actor loop and return its handle.
    pub fn spawn(config: &ChatConfig, store: Arc<dyn MessageStore>) -> DispatcherHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::new(config).run(rx));
        DispatcherHandle {
            commands: tx,
            store,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!(rooms = self.rooms.len(), "Chat dispatcher started");
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        tracing::info!("Chat dispatcher stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { session, reply } => {
                let _ = reply.send(self.register(session, Utc::now()));
            }
            Command::Unregister {
                user_id,
                connection_id,
            } => {
                self.unregister(user_id, connection_id, Utc::now());
            }
            Command::Route {
                message,
                connection_id,
            } => {
                self.route(&message, connection_id);
            }
            Command::CheckSender {
                user_id,
                connection_id,
                room_id,
                reply,
            } => {
                let live = self.is_live_sender(user_id, connection_id, room_id.as_deref());
                let _ = reply.send(live);
            }
            Command::CheckAdmission { room_id, reply } => {
                let _ = reply.send(self.rooms.check_admission(&room_id));
            }
            Command::CreateRoom {
                name,
                creator_id,
                reply,
            } => {
                let _ = reply.send(self.create_room(&name, creator_id, Utc::now()));
            }
            Command::DeleteRoom {
                room_id,
                requester_id,
                reply,
            } => {
                let _ = reply.send(self.delete_room(&room_id, requester_id));
            }
            Command::ListRooms { reply } => {
                let _ = reply.send(self.list_rooms());
            }
            Command::Sweep { reply } => {
                let _ = reply.send(self.sweep(Utc::now()));
            }
            Command::IsOnline { user_id, reply } => {
                let _ = reply.send(self.is_online(user_id));
            }
        }
    }

    /// Admit a session into the presence directory and, if it names one, its room.
    ///
    /// A previous session of the same user is evicted first so that no room
    /// keeps a reference to a replaced connection.
    pub fn register(&mut self, session: Session, now: DateTime<Utc>) -> Result<(), ChatError> {
        if let Some(room_id) = &session.room_id {
            let rejoining = self
                .presence
                .get(session.user_id)
                .and_then(|s| s.room_id.as_deref())
                == Some(room_id.as_str());
            if !rejoining {
                self.rooms.check_admission(room_id)?;
            }
        }

        if let Some(previous) = self.presence.remove(session.user_id) {
            tracing::info!(
                user_id = previous.user_id,
                connection_id = previous.connection_id,
                "Evicting previous session for reconnecting user"
            );
            self.leave_room(&previous, now);
        }

        if let Some(room_id) = &session.room_id {
            self.rooms.join(room_id, session.user_id, now)?;
            tracing::info!(
                user_id = session.user_id,
                room_id = %room_id,
                members = self.rooms.get(room_id).map(|r| r.member_count()).unwrap_or(0),
                "User joined room"
            );
        } else {
            tracing::info!(user_id = session.user_id, "User connected for private chat");
        }

        self.presence.insert(session);
        Ok(())
    }

    /// Tear down one connection. Returns false when it was already gone.
    pub fn unregister(
        &mut self,
        user_id: UserId,
        connection_id: ConnectionId,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(session) = self.presence.remove_connection(user_id, connection_id) else {
            tracing::debug!(user_id, connection_id, "Unregister for unknown connection ignored");
            return false;
        };
        self.leave_room(&session, now);
        tracing::info!(user_id, connection_id, "Session unregistered");
        // dropping `session` closes its outbound queue
        true
    }

    /// Whether `connection_id` is the user's registered session and, for a
    /// room message, still a member of `room_id`.
    pub fn is_live_sender(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        room_id: Option<&str>,
    ) -> bool {
        match self.presence.get(user_id) {
            Some(session) if session.connection_id == connection_id => match room_id {
                Some(room_id) => session.room_id.as_deref() == Some(room_id),
                None => true,
            },
            _ => false,
        }
    }

    /// Deliver a message sent by connection `connection_id` to its private
    /// recipient or room. Messages from a session that has been torn down
    /// are discarded.
    pub fn route(&mut self, message: &ChatMessage, connection_id: ConnectionId) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();

        let target = message.target();
        if target == RouteTarget::Nowhere {
            tracing::debug!(from = message.from_id, "Message has no recipient, ignored");
            return outcome;
        }
        if !self.is_live_sender(message.from_id, connection_id, sender_room(message)) {
            tracing::debug!(
                from = message.from_id,
                connection_id,
                "Message from a closed session discarded"
            );
            return outcome;
        }
        let frame = match serde_json::to_string(message) {
            Ok(json) => Frame::from(json),
            Err(e) => {
                tracing::warn!(from = message.from_id, error = %e, "Failed to encode message");
                return outcome;
            }
        };

        match target {
            RouteTarget::User(to_id) => {
                let mut recipients = vec![to_id];
                if message.from_id != to_id {
                    recipients.push(message.from_id);
                }
                for user_id in recipients {
                    match self.deliver_to(user_id, &frame) {
                        Ok(Delivery::Queued) => outcome.delivered += 1,
                        Ok(Delivery::Full | Delivery::Closed) => outcome.dropped.push(user_id),
                        // offline recipients read the message from history later
                        Err(e) => tracing::debug!(
                            from = message.from_id,
                            error = %e,
                            "Private delivery skipped"
                        ),
                    }
                }
            }
            RouteTarget::Room(room_id) => {
                let Some(room) = self.rooms.get_mut(room_id) else {
                    tracing::debug!(room_id = %room_id, "Message for unknown room dropped");
                    return outcome;
                };
                room.touch(message.created_at);
                for member in room.members() {
                    match self.presence.get(member).map(|s| s.deliver(&frame)) {
                        Some(Delivery::Queued) => outcome.delivered += 1,
                        _ => outcome.dropped.push(member),
                    }
                }
                tracing::debug!(
                    from = message.from_id,
                    room_id = %room_id,
                    delivered = outcome.delivered,
                    members = room.member_count(),
                    "Room message broadcast"
                );
            }
            RouteTarget::Nowhere => return outcome,
        }

        for &user_id in &outcome.dropped {
            tracing::warn!(user_id, "Dropping slow or closed consumer");
            self.disconnect(user_id, message.created_at);
        }
        outcome
    }

    pub fn create_room(
        &mut self,
        name: &str,
        creator_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<RoomSummary, ChatError> {
        let summary = self.rooms.create(name, creator_id, now)?.summary();
        tracing::info!(
            room_id = %summary.id,
            name = %summary.name,
            creator_id,
            "Room created"
        );
        Ok(summary)
    }

    /// Delete a room the requester created, closing every member session.
    pub fn delete_room(&mut self, room_id: &str, requester_id: UserId) -> Result<(), ChatError> {
        self.rooms.authorize_delete(room_id, requester_id)?;
        let Some(room) = self.rooms.remove(room_id) else {
            return Err(ChatError::RoomNotFound(room_id.to_string()));
        };
        let mut closed = 0;
        for member in room.members() {
            if self.presence.remove(member).is_some() {
                closed += 1;
            }
        }
        tracing::info!(room_id = %room_id, name = %room.name, closed, "Room deleted");
        Ok(())
    }

    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        self.rooms.summaries()
    }

    /// Remove idle, empty, non-default rooms. Returns the removed ids.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<RoomId> {
        let idle = self.rooms.idle_rooms(now, self.retention);
        for room_id in &idle {
            if let Some(room) = self.rooms.remove(room_id) {
                tracing::info!(room_id = %room_id, name = %room.name, "Removed idle room");
            }
        }
        idle
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.presence.contains(user_id)
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn presence(&self) -> &PresenceDirectory {
        &self.presence
    }

    fn deliver_to(&self, user_id: UserId, frame: &Frame) -> Result<Delivery, ChatError> {
        self.presence
            .get(user_id)
            .map(|session| session.deliver(frame))
            .ok_or(ChatError::Disconnected(user_id))
    }

    /// Remove a user's live session regardless of connection id.
    fn disconnect(&mut self, user_id: UserId, now: DateTime<Utc>) {
        if let Some(session) = self.presence.remove(user_id) {
            self.leave_room(&session, now);
        }
    }

    fn leave_room(&mut self, session: &Session, now: DateTime<Utc>) {
        if let Some(room_id) = &session.room_id {
            if self.rooms.leave(room_id, session.user_id, now) {
                tracing::info!(
                    user_id = session.user_id,
                    room_id = %room_id,
                    remaining = self.rooms.get(room_id).map(|r| r.member_count()).unwrap_or(0),
                    "User left room"
                );
            }
        }
    }
}

/// The room a message claims to come from; `None` for private messages.
fn sender_room(message: &ChatMessage) -> Option<&str> {
    if message.is_private() {
        None
    } else {
        Some(message.room_id.as_str())
    }
}

enum Command {
    Register {
        session: Session,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Unregister {
        user_id: UserId,
        connection_id: ConnectionId,
    },
    Route {
        message: ChatMessage,
        connection_id: ConnectionId,
    },
    CheckSender {
        user_id: UserId,
        connection_id: ConnectionId,
        room_id: Option<RoomId>,
        reply: oneshot::Sender<bool>,
    },
    CheckAdmission {
        room_id: RoomId,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    CreateRoom {
        name: String,
        creator_id: UserId,
        reply: oneshot::Sender<Result<RoomSummary, ChatError>>,
    },
    DeleteRoom {
        room_id: RoomId,
        requester_id: UserId,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    ListRooms {
        reply: oneshot::Sender<Vec<RoomSummary>>,
    },
    Sweep {
        reply: oneshot::Sender<Vec<RoomId>>,
    },
    IsOnline {
        user_id: UserId,
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable front door to the dispatcher actor.
#[derive(Clone)]
pub struct DispatcherHandle {
    commands: mpsc::UnboundedSender<Command>,
    store: Arc<dyn MessageStore>,
}

impl DispatcherHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| ChatError::DispatcherGone)?;
        rx.await.map_err(|_| ChatError::DispatcherGone)
    }

    pub async fn register(&self, session: Session) -> Result<(), ChatError> {
        self.request(|reply| Command::Register { session, reply })
            .await?
    }

    /// Fire-and-forget teardown, safe to call from `Drop`.
    pub fn unregister(&self, user_id: UserId, connection_id: ConnectionId) {
        let _ = self.commands.send(Command::Unregister {
            user_id,
            connection_id,
        });
    }

    /// Persist a message, then hand it to the actor for fan-out.
    ///
    /// Messages from a connection that is no longer registered are neither
    /// saved nor delivered. Otherwise this never fails from the sender's
    /// point of view: a store error is logged and live delivery still happens.
    pub async fn route(&self, message: ChatMessage, connection_id: ConnectionId) {
        if message.target() == RouteTarget::Nowhere {
            return;
        }
        let room_id = sender_room(&message).map(String::from);
        let live = self
            .request(|reply| Command::CheckSender {
                user_id: message.from_id,
                connection_id,
                room_id,
                reply,
            })
            .await
            .unwrap_or(false);
        if !live {
            tracing::debug!(
                from = message.from_id,
                connection_id,
                "Sender no longer registered, message discarded"
            );
            return;
        }
        match self.store.append(&message).await {
            Ok(id) => tracing::debug!(
                id,
                from = message.from_id,
                to = message.to_id,
                room_id = %message.room_id,
                "Message saved"
            ),
            Err(e) => tracing::error!(
                from = message.from_id,
                to = message.to_id,
                error = %e,
                "Failed to save chat message"
            ),
        }
        if self
            .commands
            .send(Command::Route {
                message,
                connection_id,
            })
            .is_err()
        {
            tracing::warn!("Dispatcher gone, message not delivered");
        }
    }

    pub async fn check_admission(&self, room_id: &str) -> Result<(), ChatError> {
        let room_id = room_id.to_string();
        self.request(|reply| Command::CheckAdmission { room_id, reply })
            .await?
    }

    pub async fn create_room(
        &self,
        name: &str,
        creator_id: UserId,
    ) -> Result<RoomSummary, ChatError> {
        let name = name.to_string();
        self.request(|reply| Command::CreateRoom {
            name,
            creator_id,
            reply,
        })
        .await?
    }

    pub async fn delete_room(&self, room_id: &str, requester_id: UserId) -> Result<(), ChatError> {
        let room_id = room_id.to_string();
        self.request(|reply| Command::DeleteRoom {
            room_id,
            requester_id,
            reply,
        })
        .await?
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ChatError> {
        self.request(|reply| Command::ListRooms { reply }).await
    }

    pub async fn sweep(&self) -> Result<Vec<RoomId>, ChatError> {
        self.request(|reply| Command::Sweep { reply }).await
    }

    pub async fn is_online(&self, user_id: UserId) -> Result<bool, ChatError> {
        self.request(|reply| Command::IsOnline { user_id, reply })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::store::SqliteMessageStore;
    use crate::config::DefaultRoom;

    fn config() -> ChatConfig {
        ChatConfig {
            max_rooms: 2,
            room_capacity: 3,
            send_queue_capacity: 8,
            idle_room_retention_secs: 10 * 3600,
            default_rooms: vec![DefaultRoom {
                id: "room-1".into(),
                name: "Study Lounge".into(),
            }],
            ..ChatConfig::default()
        }
    }

    fn connect(
        d: &mut Dispatcher,
        user_id: UserId,
        room: Option<&str>,
    ) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let (session, rx) = Session::new(user_id, room.map(String::from), 8);
        let conn = session.connection_id;
        d.register(session, Utc::now()).unwrap();
        (conn, rx)
    }

    fn room_message(from: UserId, room: &str, content: &str) -> ChatMessage {
        let room = room.to_string();
        ChatMessage::from_session(from, Some(&room), 0, content.into(), Utc::now())
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<ChatMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(frame.as_str()).unwrap());
        }
        out
    }

    #[test]
    fn test_register_adds_presence_and_membership() {
        let mut d = Dispatcher::new(&config());
        let (_c, _rx) = connect(&mut d, 1, Some("room-1"));
        assert!(d.is_online(1));
        assert!(d.rooms().get("room-1").unwrap().contains(1));

        let (_c2, _rx2) = connect(&mut d, 2, None);
        assert!(d.is_online(2));
        assert_eq!(d.rooms().get("room-1").unwrap().member_count(), 1);
    }

    #[test]
    fn test_register_unknown_room_fails() {
        let mut d = Dispatcher::new(&config());
        let (session, _rx) = Session::new(1, Some("ghost".into()), 8);
        let err = d.register(session, Utc::now()).unwrap_err();
        assert!(matches!(err, ChatError::RoomNotFound(_)));
        assert!(!d.is_online(1));
    }

    #[test]
    fn test_register_full_room_fails() {
        let mut d = Dispatcher::new(&config());
        let _a = connect(&mut d, 1, Some("room-1"));
        let _b = connect(&mut d, 2, Some("room-1"));
        let _c = connect(&mut d, 3, Some("room-1"));
        let (session, _rx) = Session::new(4, Some("room-1".into()), 8);
        let err = d.register(session, Utc::now()).unwrap_err();
        assert!(err.is_capacity());
        assert!(!d.is_online(4));
    }

    #[test]
    fn test_unregister_twice_is_noop() {
        let mut d = Dispatcher::new(&config());
        let (conn, mut rx) = connect(&mut d, 1, Some("room-1"));

        assert!(d.unregister(1, conn, Utc::now()));
        assert!(!d.is_online(1));
        assert!(!d.rooms().get("room-1").unwrap().contains(1));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        assert!(!d.unregister(1, conn, Utc::now()));
    }

    #[test]
    fn test_reconnect_evicts_previous_session() {
        let mut d = Dispatcher::new(&config());
        let (old_conn, mut old_rx) = connect(&mut d, 1, Some("room-1"));
        let (_new_conn, _new_rx) = connect(&mut d, 1, None);

        assert!(matches!(
            old_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(!d.rooms().get("room-1").unwrap().contains(1));

        // the evicted connection's late unregister leaves the new one alone
        assert!(!d.unregister(1, old_conn, Utc::now()));
        assert!(d.is_online(1));
    }

    #[test]
    fn test_room_broadcast_reaches_every_member_once() {
        let mut d = Dispatcher::new(&config());
        let (_a, mut rx1) = connect(&mut d, 1, Some("room-1"));
        let (_b, mut rx2) = connect(&mut d, 2, Some("room-1"));
        let (c, mut rx3) = connect(&mut d, 3, Some("room-1"));

        let outcome = d.route(&room_message(3, "room-1", "hi"), c);
        assert_eq!(outcome.delivered, 3);
        assert!(outcome.dropped.is_empty());

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let got = drain(rx);
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].from_id, 3);
            assert_eq!(got[0].room_id, "room-1");
            assert_eq!(got[0].content, "hi");
        }
    }

    #[test]
    fn test_room_broadcast_updates_last_active_to_send_time() {
        let mut d = Dispatcher::new(&config());
        let (a, _rx1) = connect(&mut d, 1, Some("room-1"));
        let (_b, _rx2) = connect(&mut d, 2, Some("room-1"));
        let msg = room_message(1, "room-1", "hi");
        d.route(&msg, a);
        assert_eq!(d.rooms().get("room-1").unwrap().last_active, msg.created_at);
    }

    #[test]
    fn test_private_message_delivered_and_echoed() {
        let mut d = Dispatcher::new(&config());
        let (a, mut rx1) = connect(&mut d, 1, None);
        let (_b, mut rx2) = connect(&mut d, 2, None);

        let msg = ChatMessage::from_session(1, None, 2, "psst".into(), Utc::now());
        let outcome = d.route(&msg, a);
        assert_eq!(outcome.delivered, 2);
        assert_eq!(drain(&mut rx2).len(), 1);
        assert_eq!(drain(&mut rx1).len(), 1);
    }

    #[test]
    fn test_private_message_to_offline_user_only_echoes() {
        let mut d = Dispatcher::new(&config());
        let (a, mut rx1) = connect(&mut d, 1, None);

        let msg = ChatMessage::from_session(1, None, 42, "anyone?".into(), Utc::now());
        let outcome = d.route(&msg, a);
        assert_eq!(outcome.delivered, 1);
        assert!(outcome.dropped.is_empty());
        assert_eq!(drain(&mut rx1).len(), 1);
    }

    #[test]
    fn test_private_message_to_self_delivered_once() {
        let mut d = Dispatcher::new(&config());
        let (a, mut rx1) = connect(&mut d, 1, None);
        let msg = ChatMessage::from_session(1, None, 1, "note".into(), Utc::now());
        d.route(&msg, a);
        assert_eq!(drain(&mut rx1).len(), 1);
    }

    #[test]
    fn test_slow_consumer_is_dropped_without_affecting_others() {
        let mut d = Dispatcher::new(&config());
        let (slow, _slow_rx) = Session::new(1, Some("room-1".into()), 1);
        d.register(slow, Utc::now()).unwrap();
        let (b, mut rx2) = connect(&mut d, 2, Some("room-1"));

        d.route(&room_message(2, "room-1", "one"), b);
        let outcome = d.route(&room_message(2, "room-1", "two"), b);

        assert_eq!(outcome.dropped, vec![1]);
        assert!(!d.is_online(1));
        assert!(!d.rooms().get("room-1").unwrap().contains(1));
        assert_eq!(drain(&mut rx2).len(), 2);
    }

    #[test]
    fn test_dropped_slow_consumer_cannot_keep_broadcasting() {
        let mut d = Dispatcher::new(&config());
        let (slow, _slow_rx) = Session::new(1, Some("room-1".into()), 1);
        let slow_conn = slow.connection_id;
        d.register(slow, Utc::now()).unwrap();
        let (b, mut rx2) = connect(&mut d, 2, Some("room-1"));

        d.route(&room_message(2, "room-1", "one"), b);
        assert_eq!(d.route(&room_message(2, "room-1", "two"), b).dropped, vec![1]);
        drain(&mut rx2);

        let outcome = d.route(&room_message(1, "room-1", "ghost"), slow_conn);
        assert_eq!(outcome, RouteOutcome::default());
        assert!(drain(&mut rx2).is_empty());
    }

    #[test]
    fn test_evicted_connection_cannot_send() {
        let mut d = Dispatcher::new(&config());
        let (old_conn, _old_rx) = connect(&mut d, 1, Some("room-1"));
        let (new_conn, mut new_rx) = connect(&mut d, 1, None);
        let (_b, mut rx2) = connect(&mut d, 2, Some("room-1"));

        assert!(!d.is_live_sender(1, old_conn, Some("room-1")));
        let outcome = d.route(&room_message(1, "room-1", "stale"), old_conn);
        assert_eq!(outcome, RouteOutcome::default());
        assert!(drain(&mut rx2).is_empty());

        // the replacement connection has no room, so it can only send privately
        assert_eq!(d.route(&room_message(1, "room-1", "wrong room"), new_conn).delivered, 0);
        let private = ChatMessage::from_session(1, None, 2, "hi".into(), Utc::now());
        assert_eq!(d.route(&private, new_conn).delivered, 2);
        assert_eq!(drain(&mut new_rx).len(), 1);
    }

    #[test]
    fn test_member_of_deleted_room_cannot_send() {
        let mut d = Dispatcher::new(&config());
        let room = d.create_room("mine", 7, Utc::now()).unwrap();
        let (a, _rx1) = connect(&mut d, 1, Some(room.id.as_str()));
        d.delete_room(&room.id, 7).unwrap();

        assert!(!d.is_live_sender(1, a, Some(&room.id)));
        let outcome = d.route(&room_message(1, &room.id, "anyone?"), a);
        assert_eq!(outcome, RouteOutcome::default());
    }

    #[test]
    fn test_message_without_target_is_noop() {
        let mut d = Dispatcher::new(&config());
        let (a, mut rx1) = connect(&mut d, 1, None);
        let msg = ChatMessage::from_session(1, None, 0, "void".into(), Utc::now());
        assert_eq!(d.route(&msg, a), RouteOutcome::default());
        assert!(drain(&mut rx1).is_empty());
    }

    #[test]
    fn test_create_room_respects_limit() {
        let mut d = Dispatcher::new(&config());
        d.create_room("a", 1, Utc::now()).unwrap();
        d.create_room("b", 1, Utc::now()).unwrap();
        let err = d.create_room("c", 1, Utc::now()).unwrap_err();
        assert!(matches!(err, ChatError::TooManyRooms(2)));
        assert_eq!(d.list_rooms().len(), 3);
    }

    #[test]
    fn test_delete_room_closes_member_sessions() {
        let mut d = Dispatcher::new(&config());
        let room = d.create_room("mine", 7, Utc::now()).unwrap();
        let (_a, mut rx1) = connect(&mut d, 1, Some(&room.id));
        let (_b, mut rx2) = connect(&mut d, 2, Some(&room.id));

        assert!(matches!(
            d.delete_room(&room.id, 1),
            Err(ChatError::PermissionDenied(_))
        ));
        d.delete_room(&room.id, 7).unwrap();

        assert!(d.rooms().get(&room.id).is_none());
        assert!(!d.is_online(1));
        assert!(!d.is_online(2));
        for rx in [&mut rx1, &mut rx2] {
            assert!(matches!(
                rx.try_recv(),
                Err(mpsc::error::TryRecvError::Disconnected)
            ));
        }
    }

    #[test]
    fn test_default_room_cannot_be_deleted() {
        let mut d = Dispatcher::new(&config());
        assert!(matches!(
            d.delete_room("room-1", 0),
            Err(ChatError::Protected(_))
        ));
    }

    #[test]
    fn test_sweep_respects_defaults_and_retention() {
        let mut d = Dispatcher::new(&config());
        let long_ago = Utc::now() - TimeDelta::hours(11);
        let old = d.create_room("old", 1, long_ago).unwrap();
        let young = d.create_room("young", 1, Utc::now()).unwrap();
        d.rooms.get_mut("room-1").unwrap().touch(long_ago - TimeDelta::days(365));

        let removed = d.sweep(Utc::now());
        assert_eq!(removed, vec![old.id.clone()]);
        assert!(d.rooms().get("room-1").is_some());
        assert!(d.rooms().get(&young.id).is_some());
        assert!(d.rooms().get(&old.id).is_none());
    }

    #[test]
    fn test_sweep_keeps_occupied_rooms() {
        let mut d = Dispatcher::new(&config());
        let long_ago = Utc::now() - TimeDelta::hours(11);
        let room = d.create_room("busy", 1, long_ago).unwrap();
        let (session, _rx) = Session::new(5, Some(room.id.clone()), 8);
        d.register(session, long_ago).unwrap();
        assert!(d.sweep(Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn test_handle_routes_and_persists() {
        let store = Arc::new(SqliteMessageStore::open_in_memory().unwrap());
        let handle = Dispatcher::spawn(&config(), store.clone());

        let (session, mut rx) = Session::new(1, Some("room-1".into()), 8);
        let conn = session.connection_id;
        handle.register(session).await.unwrap();
        assert!(handle.is_online(1).await.unwrap());

        handle.route(room_message(1, "room-1", "saved"), conn).await;
        let frame = rx.recv().await.expect("frame delivered");
        let msg: ChatMessage = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(msg.content, "saved");

        let history = store.room_history("room-1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "saved");

        handle.unregister(1, conn);
        assert!(rx.recv().await.is_none());
        assert!(!handle.is_online(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_handle_skips_store_for_closed_connection() {
        let store = Arc::new(SqliteMessageStore::open_in_memory().unwrap());
        let handle = Dispatcher::spawn(&config(), store.clone());

        let (old, _old_rx) = Session::new(1, Some("room-1".into()), 8);
        let old_conn = old.connection_id;
        handle.register(old).await.unwrap();
        let (new, mut new_rx) = Session::new(1, Some("room-1".into()), 8);
        let new_conn = new.connection_id;
        handle.register(new).await.unwrap();

        handle.route(room_message(1, "room-1", "late"), old_conn).await;
        handle.route(room_message(1, "room-1", "current"), new_conn).await;

        let frame = new_rx.recv().await.expect("frame delivered");
        let msg: ChatMessage = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(msg.content, "current");

        let history = store.room_history("room-1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "current");
    }

    #[tokio::test]
    async fn test_handle_room_lifecycle() {
        let store = Arc::new(SqliteMessageStore::open_in_memory().unwrap());
        let handle = Dispatcher::spawn(&config(), store);

        let room = handle.create_room("Reading Club", 3).await.unwrap();
        assert_eq!(room.creator_id, 3);
        assert!(handle.check_admission(&room.id).await.is_ok());
        assert_eq!(handle.list_rooms().await.unwrap().len(), 2);

        handle.delete_room(&room.id, 3).await.unwrap();
        assert!(matches!(
            handle.check_admission(&room.id).await,
            Err(ChatError::RoomNotFound(_))
        ));
        assert!(handle.sweep().await.unwrap().is_empty());
    }
}
