//! v001 -- Initial schema creation.
//!
//! Creates the replica tables: `messages`, `channels`, `channel_status`,
//! `users`, plus the local bookkeeping tables `outbox` and `sync_positions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id               TEXT PRIMARY KEY NOT NULL,  -- base64url, 32 random bytes
    channel          TEXT NOT NULL,              -- hex-encoded channel key id
    sender           TEXT NOT NULL,              -- hex-encoded sender key id
    ts               INTEGER NOT NULL,           -- sender clock, unix millis
    prev             TEXT,
    text             TEXT,
    command          BLOB,                       -- bincode MessageCommand
    remote_index     INTEGER NOT NULL DEFAULT 0, -- i64::MAX while pending
    remote_timestamp INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_channel_ridx
    ON messages(channel, remote_index, ts);

-- ----------------------------------------------------------------
-- Channels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id          TEXT PRIMARY KEY NOT NULL,   -- hex-encoded channel key id
    team        TEXT,
    name        TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    topic       TEXT NOT NULL DEFAULT '',
    visibility  INTEGER NOT NULL DEFAULT 0   -- 0 visible, 1 hidden
);

CREATE TABLE IF NOT EXISTS channel_status (
    channel           TEXT PRIMARY KEY NOT NULL,
    snippet           TEXT NOT NULL DEFAULT '',
    message_index     INTEGER NOT NULL DEFAULT 0,
    message_timestamp INTEGER NOT NULL DEFAULT 0,
    read_index        INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_channel_status_ts
    ON channel_status(message_timestamp DESC);

-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    kid      TEXT PRIMARY KEY NOT NULL,      -- hex-encoded key id
    username TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Outgoing envelopes not yet accepted by the relay
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS outbox (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    channel    TEXT NOT NULL,
    message_id TEXT NOT NULL,
    envelope   BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outbox_channel ON outbox(channel, id);

-- ----------------------------------------------------------------
-- Last relay index pulled per channel
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sync_positions (
    channel      TEXT PRIMARY KEY NOT NULL,
    remote_index INTEGER NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
