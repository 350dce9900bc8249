//! CRUD operations for [`Channel`] records.

use hush_shared::KeyId;
use rusqlite::{params, OptionalExtension, Transaction};

use crate::columns::{key_id, opt_key_id};
use crate::database::Database;
use crate::error::Result;
use crate::messages::delete_channel_messages;
use crate::models::{Channel, Visibility};

// ------------------------------------------------------------------
// Create / update
// ------------------------------------------------------------------

/// Insert the channel unless one with the same ID exists. Returns `true` if
/// a row was inserted.
pub fn insert_channel_if_absent(tx: &Transaction<'_>, channel: &Channel) -> Result<bool> {
    let affected = tx.execute(
        "INSERT INTO channels (id, team, name, description, topic, visibility)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO NOTHING",
        params![
            channel.id.to_hex(),
            channel.team.map(|t| t.to_hex()),
            channel.name,
            channel.description,
            channel.topic,
            channel.visibility.to_i64(),
        ],
    )?;
    Ok(affected > 0)
}

/// Insert or overwrite the whole channel row.
pub fn save_channel(tx: &Transaction<'_>, channel: &Channel) -> Result<()> {
    tx.execute(
        "INSERT INTO channels (id, team, name, description, topic, visibility)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             team = excluded.team,
             name = excluded.name,
             description = excluded.description,
             topic = excluded.topic,
             visibility = excluded.visibility",
        params![
            channel.id.to_hex(),
            channel.team.map(|t| t.to_hex()),
            channel.name,
            channel.description,
            channel.topic,
            channel.visibility.to_i64(),
        ],
    )?;
    Ok(())
}

// ------------------------------------------------------------------
// Delete
// ------------------------------------------------------------------

/// Delete a channel and everything stored for it: messages, search rows,
/// status, queued envelopes and the sync position. Returns `true` if the
/// channel row existed.
pub fn delete_channel(tx: &Transaction<'_>, id: &KeyId) -> Result<bool> {
    let hex_id = id.to_hex();

    let messages = delete_channel_messages(tx, id)?;
    tx.execute("DELETE FROM channel_status WHERE channel = ?1", params![hex_id])?;
    tx.execute("DELETE FROM outbox WHERE channel = ?1", params![hex_id])?;
    tx.execute("DELETE FROM sync_positions WHERE channel = ?1", params![hex_id])?;
    tx.execute("DELETE FROM sync_pending WHERE channel = ?1", params![hex_id])?;
    let affected = tx.execute("DELETE FROM channels WHERE id = ?1", params![hex_id])?;

    tracing::debug!(channel = %id.short(), messages, "deleted channel");
    Ok(affected > 0)
}

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single channel.
    pub fn channel(&self, id: &KeyId) -> Result<Option<Channel>> {
        let channel = self
            .conn()
            .query_row(
                "SELECT id, team, name, description, topic, visibility
                 FROM channels
                 WHERE id = ?1",
                params![id.to_hex()],
                row_to_channel,
            )
            .optional()?;
        Ok(channel)
    }

    /// List all channels, ordered by name.
    pub fn channels(&self) -> Result<Vec<Channel>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, team, name, description, topic, visibility
             FROM channels
             ORDER BY name ASC, id ASC",
        )?;

        let rows = stmt.query_map([], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    // ------------------------------------------------------------------
    // Local-only fields
    // ------------------------------------------------------------------

    /// Returns `true` if the channel exists.
    pub fn set_channel_visibility(&self, id: &KeyId, visibility: Visibility) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE channels SET visibility = ?1 WHERE id = ?2",
            params![visibility.to_i64(), id.to_hex()],
        )?;
        Ok(affected > 0)
    }

    /// Returns `true` if the channel exists.
    pub fn set_channel_topic(&self, id: &KeyId, topic: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE channels SET topic = ?1 WHERE id = ?2",
            params![topic, id.to_hex()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Channel`].
pub(crate) fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: key_id(row, 0)?,
        team: opt_key_id(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        topic: row.get(4)?,
        visibility: Visibility::from_i64(row.get(5)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_shared::{Key, Message};

    use crate::messages::upsert_message;

    #[test]
    fn insert_if_absent_keeps_existing() {
        let mut db = Database::open_in_memory().unwrap();
        let id = Key::generate().id();

        let mut named = Channel::new(id);
        named.name = "general".into();
        assert!(db.transact(|tx| insert_channel_if_absent(tx, &named)).unwrap());
        assert!(!db
            .transact(|tx| insert_channel_if_absent(tx, &Channel::new(id)))
            .unwrap());

        assert_eq!(db.channel(&id).unwrap(), Some(named));
        assert_eq!(db.channels().unwrap().len(), 1);
    }

    #[test]
    fn local_fields() {
        let mut db = Database::open_in_memory().unwrap();
        let id = Key::generate().id();
        db.transact(|tx| save_channel(tx, &Channel::new(id))).unwrap();

        assert!(db.set_channel_visibility(&id, Visibility::Hidden).unwrap());
        assert!(db.set_channel_topic(&id, "weekly sync").unwrap());
        assert!(!db
            .set_channel_topic(&Key::generate().id(), "nobody")
            .unwrap());

        let channel = db.channel(&id).unwrap().unwrap();
        assert_eq!(channel.visibility, Visibility::Hidden);
        assert_eq!(channel.topic, "weekly sync");
    }

    #[test]
    fn delete_purges_messages() {
        let mut db = Database::open_in_memory().unwrap();
        let id = Key::generate().id();
        let msg = Message::new(id, Key::generate().id()).with_text("bye");

        db.transact(|tx| {
            save_channel(tx, &Channel::new(id))?;
            upsert_message(tx, &msg)
        })
        .unwrap();

        assert!(db.transact(|tx| delete_channel(tx, &id)).unwrap());
        assert_eq!(db.channel(&id).unwrap(), None);
        assert!(db.messages(&id).unwrap().is_empty());
        assert!(!db.transact(|tx| delete_channel(tx, &id)).unwrap());
    }
}
