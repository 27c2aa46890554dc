//! Realtime chat core.
//!
//! The [`Dispatcher`] actor owns the room registry and the presence directory.
//! Everything else (WebSocket pumps, REST handlers, the idle-room sweeper)
//! reaches that state through a cloneable [`DispatcherHandle`].

pub mod dispatcher;
pub mod history;
pub mod message;
pub mod presence;
pub mod profile;
pub mod room;
pub mod rooms;
pub mod session;
pub mod store;
pub mod sweeper;

/// Numeric user identifier supplied by the authentication layer.
pub type UserId = u64;

/// Room identifier, e.g. `room-1` or `room-<uuid>`.
pub type RoomId = String;

pub use dispatcher::{Dispatcher, DispatcherHandle, RouteOutcome};
pub use message::ChatMessage;
pub use presence::PresenceDirectory;
pub use room::{Room, RoomRegistry, RoomSummary};
pub use session::Session;
pub use store::{MessageStore, SqliteMessageStore};
