//! Database schema definitions and migrations.

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Full DDL for the parley chat store.
pub const CREATE_SCHEMA: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- Chats, one per contact phone
CREATE TABLE IF NOT EXISTS chats (
    id            TEXT PRIMARY KEY,
    contact_name  TEXT NOT NULL,
    contact_phone TEXT NOT NULL UNIQUE,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Conversation messages
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY,
    chat_id    TEXT NOT NULL REFERENCES chats(id),
    direction  TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Executed intentions
CREATE TABLE IF NOT EXISTS interactions (
    id          TEXT PRIMARY KEY,
    chat_id     TEXT NOT NULL REFERENCES chats(id),
    tool_name   TEXT NOT NULL,
    fields_json TEXT NOT NULL DEFAULT '{}',
    succeeded   INTEGER NOT NULL DEFAULT 1,
    reply       TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Slot-filling in progress, one row per chat
CREATE TABLE IF NOT EXISTS pending_intentions (
    chat_id      TEXT PRIMARY KEY REFERENCES chats(id),
    pending_json TEXT NOT NULL,
    updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, created_at);
CREATE INDEX IF NOT EXISTS idx_interactions_chat ON interactions(chat_id);
"#;
