//! Local bookkeeping for the sync engine: envelopes waiting to reach the
//! relay, how far each channel log has been pulled, and which channels still
//! owe a sync.

use hush_shared::KeyId;
use rusqlite::{params, OptionalExtension, Transaction};

use crate::columns::key_id;
use crate::database::Database;
use crate::error::Result;
use crate::models::OutboxEntry;

/// Queue an envelope for delivery. Written in the same transaction as the
/// pending message so the two never diverge.
pub fn enqueue_outgoing(
    tx: &Transaction<'_>,
    channel: &KeyId,
    message_id: &str,
    envelope: &[u8],
) -> Result<i64> {
    tx.execute(
        "INSERT INTO outbox (channel, message_id, envelope) VALUES (?1, ?2, ?3)",
        params![channel.to_hex(), message_id, envelope],
    )?;
    Ok(tx.last_insert_rowid())
}

pub fn set_sync_position(tx: &Transaction<'_>, channel: &KeyId, remote_index: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO sync_positions (channel, remote_index) VALUES (?1, ?2)
         ON CONFLICT(channel) DO UPDATE SET
             remote_index = MAX(remote_index, excluded.remote_index)",
        params![channel.to_hex(), remote_index],
    )?;
    Ok(())
}

/// Record that the channel has remote changes to pull. Stays set until
/// [`clear_sync_pending`] commits with the channel's sync.
pub fn mark_sync_pending(tx: &Transaction<'_>, channel: &KeyId) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO sync_pending (channel) VALUES (?1)",
        params![channel.to_hex()],
    )?;
    Ok(())
}

pub fn clear_sync_pending(tx: &Transaction<'_>, channel: &KeyId) -> Result<()> {
    tx.execute(
        "DELETE FROM sync_pending WHERE channel = ?1",
        params![channel.to_hex()],
    )?;
    Ok(())
}

impl Database {
    /// Queued envelopes of a channel, oldest first.
    pub fn outgoing(&self, channel: &KeyId) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, channel, message_id, envelope
             FROM outbox
             WHERE channel = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![channel.to_hex()], |row| {
            Ok(OutboxEntry {
                id: row.get(0)?,
                channel: key_id(row, 1)?,
                message_id: row.get(2)?,
                envelope: row.get(3)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Drop an envelope the relay accepted. Returns `true` if it was queued.
    pub fn remove_outgoing(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Highest relay index already pulled for the channel, 0 if none.
    pub fn sync_position(&self, channel: &KeyId) -> Result<i64> {
        let position = self
            .conn()
            .query_row(
                "SELECT remote_index FROM sync_positions WHERE channel = ?1",
                params![channel.to_hex()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(position.unwrap_or(0))
    }

    pub fn pending_syncs(&self) -> Result<Vec<KeyId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT channel FROM sync_pending ORDER BY channel")?;
        let rows = stmt.query_map([], |row| key_id(row, 0))?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }
}
