//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `messages`, `message_tombstones`, `users`,
//! `likes`, and `notifications`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    sender     TEXT NOT NULL,               -- UUID of the sending user
    recipient  TEXT NOT NULL,               -- UUID of the receiving user
    content    TEXT NOT NULL,               -- trimmed plain text
    read       INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    read_at    TEXT,                        -- RFC-3339, set once on read
    created_at TEXT NOT NULL                -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_created
    ON messages(sender, recipient, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_recipient_unread
    ON messages(recipient, read);

-- ----------------------------------------------------------------
-- Message tombstones (per-viewer soft deletion)
-- ----------------------------------------------------------------
-- One row hides one message from one viewer. A message both participants
-- tombstoned becomes eligible for the retention sweep.
CREATE TABLE IF NOT EXISTS message_tombstones (
    message_id TEXT NOT NULL,               -- FK -> messages(id)
    user_id    TEXT NOT NULL,               -- the viewer hiding the message
    created_at TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tombstones_user ON message_tombstones(user_id);

-- ----------------------------------------------------------------
-- Users (read-side replica of the account system)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    username    TEXT NOT NULL UNIQUE,
    plan        TEXT NOT NULL DEFAULT 'free',
    video_chat  INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    active      INTEGER NOT NULL DEFAULT 1, -- boolean 0/1
    verified_at TEXT,                       -- RFC-3339, NULL = unverified
    photo       TEXT,
    age         INTEGER,
    city        TEXT,
    country     TEXT,
    created_at  TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Likes (matching substrate: a mutual pair of rows is a match)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS likes (
    user_id    TEXT NOT NULL,
    target_id  TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (user_id, target_id)
);

CREATE INDEX IF NOT EXISTS idx_likes_target ON likes(target_id);

-- ----------------------------------------------------------------
-- Notifications
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    recipient  TEXT NOT NULL,
    sender     TEXT,                        -- NULL for system notifications
    kind       TEXT NOT NULL,
    body       TEXT NOT NULL,
    link       TEXT,
    read       INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_recipient
    ON notifications(recipient, read);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
