use hush_shared::{KeyId, Message, MessageCommand, PENDING_REMOTE_INDEX};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Transaction};

use crate::columns::key_id;
use crate::database::Database;
use crate::error::Result;

const MESSAGE_COLUMNS: &str =
    "id, channel, sender, ts, prev, text, command, remote_index, remote_timestamp";

/// Insert the message, or overwrite every column of the row with the same ID.
///
/// Re-applying a message that is already stored leaves the row as it was,
/// which is what makes replayed relay events harmless.
pub fn upsert_message(tx: &Transaction<'_>, msg: &Message) -> Result<()> {
    let command = msg.command.as_ref().map(MessageCommand::to_bytes).transpose()?;

    tx.execute(
        "INSERT INTO messages
             (id, channel, sender, ts, prev, text, command, remote_index, remote_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
             channel = excluded.channel,
             sender = excluded.sender,
             ts = excluded.ts,
             prev = excluded.prev,
             text = excluded.text,
             command = excluded.command,
             remote_index = excluded.remote_index,
             remote_timestamp = excluded.remote_timestamp",
        params![
            msg.id,
            msg.channel.to_hex(),
            msg.sender.to_hex(),
            msg.timestamp,
            msg.prev,
            msg.text,
            command,
            msg.remote_index,
            msg.remote_timestamp,
        ],
    )?;

    tx.execute("DELETE FROM messages_fts WHERE id = ?1", params![msg.id])?;
    if let Some(text) = msg.text() {
        tx.execute(
            "INSERT INTO messages_fts (id, text) VALUES (?1, ?2)",
            params![msg.id, text],
        )?;
    }

    Ok(())
}

/// Apply a message pulled from the relay. A row the relay already confirmed
/// is kept as is, so a message appended twice keeps its first position.
/// Returns `true` if the row was written.
pub fn merge_remote_message(tx: &Transaction<'_>, msg: &Message) -> Result<bool> {
    let confirmed: bool = tx.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM messages
             WHERE id = ?1 AND remote_index > 0 AND remote_index < ?2
         )",
        params![msg.id, PENDING_REMOTE_INDEX],
        |row| row.get(0),
    )?;
    if confirmed {
        return Ok(false);
    }

    upsert_message(tx, msg)?;
    Ok(true)
}

/// Remove every message of a channel along with its search rows.
pub fn delete_channel_messages(tx: &Transaction<'_>, channel: &KeyId) -> Result<usize> {
    tx.execute(
        "DELETE FROM messages_fts WHERE id IN (SELECT id FROM messages WHERE channel = ?1)",
        params![channel.to_hex()],
    )?;
    let affected = tx.execute(
        "DELETE FROM messages WHERE channel = ?1",
        params![channel.to_hex()],
    )?;
    Ok(affected)
}

impl Database {
    /// Messages of a channel in timeline order: ascending relay index, then
    /// sender timestamp. Pending messages come last.
    pub fn messages(&self, channel: &KeyId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE channel = ?1
             ORDER BY remote_index ASC, ts ASC"
        ))?;

        let rows = stmt.query_map(params![channel.to_hex()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn message(&self, id: &str) -> Result<Option<Message>> {
        let msg = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()?;
        Ok(msg)
    }

    /// IDs of messages whose text contains every term of `query`.
    pub fn search(&self, query: &str) -> Result<Vec<String>> {
        let Some(expr) = match_expression(query) else {
            return Ok(Vec::new());
        };

        let mut stmt = self
            .conn()
            .prepare("SELECT DISTINCT id FROM messages_fts WHERE messages_fts MATCH ?1")?;
        let rows = stmt.query_map(params![expr], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

// Quote each term so user input is never parsed as FTS5 query syntax.
fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let command_bytes: Option<Vec<u8>> = row.get(6)?;
    let command = command_bytes
        .filter(|b| !b.is_empty())
        .map(|b| MessageCommand::from_bytes(&b))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Blob, Box::new(e)))?;

    Ok(Message {
        id: row.get(0)?,
        channel: key_id(row, 1)?,
        sender: key_id(row, 2)?,
        timestamp: row.get(3)?,
        prev: row.get(4)?,
        text: row.get(5)?,
        command,
        remote_index: row.get(7)?,
        remote_timestamp: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_shared::{ChannelInfo, ChannelInvite, Key};

    fn message(channel: &KeyId, sender: &KeyId, text: &str, remote_index: i64) -> Message {
        let mut msg = Message::new(*channel, *sender).with_text(text);
        msg.remote_index = remote_index;
        msg.remote_timestamp = remote_index * 1000;
        msg
    }

    #[test]
    fn messages_sorted_by_remote_index() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        let sender = Key::generate().id();

        db.transact(|tx| {
            for i in [3, 1, 2] {
                upsert_message(tx, &message(&channel, &sender, &format!("m{i}"), i))?;
            }
            Ok(())
        })
        .unwrap();

        let indexes: Vec<i64> = db
            .messages(&channel)
            .unwrap()
            .iter()
            .map(|m| m.remote_index)
            .collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[test]
    fn pending_sorts_last_and_resolves_in_place() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        let sender = Key::generate().id();

        let mut pending = message(&channel, &sender, "pending", 0);
        pending.remote_index = PENDING_REMOTE_INDEX;
        // older sender clock than the confirmed message, still sorts after it
        pending.timestamp = 1;
        db.transact(|tx| {
            upsert_message(tx, &pending)?;
            upsert_message(tx, &message(&channel, &sender, "confirmed", 7))
        })
        .unwrap();

        let msgs = db.messages(&channel).unwrap();
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1].is_pending());

        let mut confirmed = pending.clone();
        confirmed.remote_index = 8;
        confirmed.remote_timestamp = 8000;
        db.transact(|tx| upsert_message(tx, &confirmed)).unwrap();

        let msgs = db.messages(&channel).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1], confirmed);
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        let msg = message(&channel, &Key::generate().id(), "once", 1);

        db.transact(|tx| upsert_message(tx, &msg)).unwrap();
        let first = db.messages(&channel).unwrap();
        db.transact(|tx| upsert_message(tx, &msg)).unwrap();

        assert_eq!(db.messages(&channel).unwrap(), first);
        assert_eq!(db.search("once").unwrap(), vec![msg.id.clone()]);
    }

    #[test]
    fn command_column_roundtrip() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        let msg = Message::channel_info(channel, Key::generate().id(), ChannelInfo::named("ops"));

        db.transact(|tx| upsert_message(tx, &msg)).unwrap();
        assert_eq!(db.message(&msg.id).unwrap(), Some(msg));
        assert_eq!(db.message("missing").unwrap(), None);
    }

    #[test]
    fn invites_column_roundtrip() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate();
        let alice = Key::generate().id();
        let bob = Key::generate().id();
        let invite = ChannelInvite::new(&channel, &bob, &alice, "tok", None).unwrap();
        let msg = Message::channel_invites(channel.id(), alice, vec![invite]);

        db.transact(|tx| upsert_message(tx, &msg)).unwrap();
        let stored = db.message(&msg.id).unwrap().unwrap();
        let invites = stored.command.as_ref().map(|c| c.channel_invites());
        assert_eq!(invites.map(|i| i[0].recipient), Some(bob));
        assert_eq!(stored, msg);
    }

    #[test]
    fn merge_keeps_confirmed_rows() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        let sender = Key::generate().id();

        let mut pending = message(&channel, &sender, "first", 0);
        pending.remote_index = PENDING_REMOTE_INDEX;
        db.transact(|tx| upsert_message(tx, &pending)).unwrap();

        let mut first = pending.clone();
        first.remote_index = 1;
        first.remote_timestamp = 1000;
        assert!(db.transact(|tx| merge_remote_message(tx, &first)).unwrap());

        // the same message appended again later
        let mut again = first.clone();
        again.remote_index = 3;
        again.remote_timestamp = 3000;
        assert!(!db.transact(|tx| merge_remote_message(tx, &again)).unwrap());
        assert_eq!(db.message(&first.id).unwrap(), Some(first));

        let fresh = message(&channel, &sender, "second", 2);
        assert!(db.transact(|tx| merge_remote_message(tx, &fresh)).unwrap());
        assert_eq!(db.messages(&channel).unwrap().len(), 2);
    }

    #[test]
    fn search_finds_term() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        let sender = Key::generate().id();
        let hit = message(&channel, &sender, "that mumblecore film was slow", 1);
        let miss = message(&channel, &sender, "blockbuster tonight", 2);

        db.transact(|tx| {
            upsert_message(tx, &hit)?;
            upsert_message(tx, &miss)
        })
        .unwrap();

        assert_eq!(db.search("mumblecore").unwrap(), vec![hit.id]);
        assert!(db.search("   ").unwrap().is_empty());
        // FTS syntax in user input is treated as plain text
        assert!(db.search("\"unbalanced OR").unwrap().is_empty());
    }

    #[test]
    fn edited_text_is_reindexed() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        let mut msg = message(&channel, &Key::generate().id(), "before", 1);

        db.transact(|tx| upsert_message(tx, &msg)).unwrap();
        msg.text = Some("after".into());
        db.transact(|tx| upsert_message(tx, &msg)).unwrap();

        assert!(db.search("before").unwrap().is_empty());
        assert_eq!(db.search("after").unwrap(), vec![msg.id]);
    }

    #[test]
    fn delete_channel_messages_purges_search() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        let other = Key::generate().id();
        let sender = Key::generate().id();
        let keep = message(&other, &sender, "mumblecore too", 1);

        db.transact(|tx| {
            upsert_message(tx, &message(&channel, &sender, "mumblecore", 1))?;
            upsert_message(tx, &keep)
        })
        .unwrap();

        let removed = db
            .transact(|tx| delete_channel_messages(tx, &channel))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(db.messages(&channel).unwrap().is_empty());
        assert_eq!(db.search("mumblecore").unwrap(), vec![keep.id]);
    }
}
