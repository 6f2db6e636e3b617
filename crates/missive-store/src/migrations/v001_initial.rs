//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `users`, `friendships`, and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (directory data only; credentials live elsewhere)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    full_name  TEXT NOT NULL,
    avatar_url TEXT,
    created_at TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Friendships
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friendships (
    id           TEXT PRIMARY KEY NOT NULL, -- UUID v4
    sender_id    TEXT NOT NULL,             -- who sent the request
    recipient_id TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',  -- pending | accepted | rejected
    created_at   TEXT NOT NULL,
    responded_at TEXT,

    UNIQUE (sender_id, recipient_id)
);

CREATE INDEX IF NOT EXISTS idx_friendships_recipient
    ON friendships(recipient_id, status);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL, -- UUID v4
    sender_id    TEXT NOT NULL,
    receiver_id  TEXT NOT NULL,
    text         TEXT NOT NULL DEFAULT '',
    image_url    TEXT,
    file_key     TEXT,                      -- blob-store key
    file_name    TEXT,
    file_size    INTEGER,
    file_mime    TEXT,
    file_url     TEXT,
    reply_to     TEXT,                      -- message id; referent may be gone
    linked_to    TEXT,                      -- message id; referent may be gone
    tag          TEXT,
    metadata     TEXT NOT NULL DEFAULT '[]', -- ordered key/value pairs, JSON
    status       TEXT NOT NULL DEFAULT 'sent', -- sent | delivered | read
    delivered_at TEXT,
    read_at      TEXT,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(sender_id, receiver_id, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_created
    ON messages(created_at);

CREATE INDEX IF NOT EXISTS idx_messages_tag
    ON messages(tag);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
