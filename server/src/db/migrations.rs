use rusqlite_migration::{Migrations, M};

/// Schema migrations, tracked through SQLite's `user_version` pragma.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: chat message history

CREATE TABLE chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_user_id INTEGER NOT NULL,
    to_user_id INTEGER NOT NULL DEFAULT 0,
    room_id TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_chat_messages_room ON chat_messages(room_id, id);
CREATE INDEX idx_chat_messages_pair ON chat_messages(from_user_id, to_user_id, id);
CREATE INDEX idx_chat_messages_to ON chat_messages(to_user_id, id);
",
    )])
}
