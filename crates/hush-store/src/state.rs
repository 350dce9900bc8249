//! Channel state: the channel record plus its activity summary, derived by
//! folding messages in timeline order.
//!
//! This is the only place channel metadata changes in response to messages.

use hush_shared::{KeyId, Message};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use crate::channels::{row_to_channel, save_channel};
use crate::columns::key_id;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Channel, ChannelStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelState {
    pub channel: Channel,
    pub status: ChannelStatus,
}

impl ChannelState {
    pub fn new(id: KeyId) -> Self {
        Self {
            channel: Channel::new(id),
            status: ChannelStatus::new(id),
        }
    }

    pub fn id(&self) -> &KeyId {
        &self.channel.id
    }

    /// Fold one message into the state.
    ///
    /// Callers apply messages once each, in ascending `(remote_index,
    /// timestamp)` order. Empty info fields never clear existing metadata.
    pub fn update(&mut self, msg: &Message) {
        if let Some(text) = msg.text() {
            self.status.snippet = text.to_string();
        }

        if let Some(info) = msg.command.as_ref().and_then(|c| c.channel_info()) {
            if !info.name.is_empty() {
                self.channel.name = info.name.clone();
            }
            if !info.description.is_empty() {
                self.channel.description = info.description.clone();
            }
        }

        self.status.message_index = msg.remote_index;
        self.status.message_timestamp = msg.remote_timestamp;
    }
}

/// Persist both halves of the state.
pub fn save_channel_state(tx: &Transaction<'_>, state: &ChannelState) -> Result<()> {
    save_channel(tx, &state.channel)?;
    save_channel_status(tx, &state.status)
}

pub fn save_channel_status(tx: &Transaction<'_>, status: &ChannelStatus) -> Result<()> {
    tx.execute(
        "INSERT INTO channel_status (channel, snippet, message_index, message_timestamp, read_index)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(channel) DO UPDATE SET
             snippet = excluded.snippet,
             message_index = excluded.message_index,
             message_timestamp = excluded.message_timestamp,
             read_index = excluded.read_index",
        params![
            status.channel.to_hex(),
            status.snippet,
            status.message_index,
            status.message_timestamp,
            status.read_index,
        ],
    )?;
    Ok(())
}

/// Load a channel's state through any connection, including an open
/// transaction. A channel without any folded message gets an empty status.
pub fn load_channel_state(conn: &Connection, id: &KeyId) -> Result<Option<ChannelState>> {
    let state = conn
        .query_row(
            &format!("{STATE_QUERY} WHERE c.id = ?1"),
            params![id.to_hex()],
            row_to_state,
        )
        .optional()?;
    Ok(state)
}

const STATE_QUERY: &str = "
    SELECT c.id, c.team, c.name, c.description, c.topic, c.visibility,
           s.snippet, s.message_index, s.message_timestamp, s.read_index
    FROM channels c
    LEFT JOIN channel_status s ON s.channel = c.id";

impl Database {
    pub fn channel_status(&self, channel: &KeyId) -> Result<Option<ChannelStatus>> {
        let status = self
            .conn()
            .query_row(
                "SELECT channel, snippet, message_index, message_timestamp, read_index
                 FROM channel_status WHERE channel = ?1",
                params![channel.to_hex()],
                |row| {
                    Ok(ChannelStatus {
                        channel: key_id(row, 0)?,
                        snippet: row.get(1)?,
                        message_index: row.get(2)?,
                        message_timestamp: row.get(3)?,
                        read_index: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(status)
    }

    /// State of a registered channel.
    pub fn channel_state(&self, id: &KeyId) -> Result<Option<ChannelState>> {
        load_channel_state(self.conn(), id)
    }

    /// States of all channels, most recent activity first.
    pub fn channel_states(&self) -> Result<Vec<ChannelState>> {
        let mut stmt = self.conn().prepare(&format!(
            "{STATE_QUERY} ORDER BY COALESCE(s.message_timestamp, 0) DESC, c.id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_state)?;

        let mut states = Vec::new();
        for row in rows {
            states.push(row?);
        }
        Ok(states)
    }

    /// Advance the read cursor. Never moves it backwards; returns the cursor
    /// after the call, or [`StoreError::NotFound`] for an unknown channel.
    pub fn set_read_index(&mut self, channel: &KeyId, index: i64) -> Result<i64> {
        self.transact(|tx| {
            let known: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM channels WHERE id = ?1)",
                params![channel.to_hex()],
                |row| row.get(0),
            )?;
            if !known {
                return Err(StoreError::NotFound);
            }

            let mut status = ChannelStatus::new(*channel);
            if let Some(existing) = tx
                .query_row(
                    "SELECT snippet, message_index, message_timestamp, read_index
                     FROM channel_status WHERE channel = ?1",
                    params![channel.to_hex()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?
            {
                (
                    status.snippet,
                    status.message_index,
                    status.message_timestamp,
                    status.read_index,
                ) = existing;
            }

            status.read_index = status.read_index.max(index);
            save_channel_status(tx, &status)?;
            Ok(status.read_index)
        })
    }
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelState> {
    let channel = row_to_channel(row)?;
    let status = ChannelStatus {
        channel: channel.id,
        snippet: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        message_index: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
        message_timestamp: row.get::<_, Option<i64>>(8)?.unwrap_or_default(),
        read_index: row.get::<_, Option<i64>>(9)?.unwrap_or_default(),
    };
    Ok(ChannelState { channel, status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_shared::{ChannelInfo, Key};

    fn confirmed(mut msg: Message, index: i64) -> Message {
        msg.remote_index = index;
        msg.remote_timestamp = 1_000 + index;
        msg
    }

    #[test]
    fn fold_text_and_info() {
        let channel = Key::generate().id();
        let sender = Key::generate().id();
        let mut state = ChannelState::new(channel);

        state.update(&confirmed(Message::new(channel, sender).with_text("hello"), 1));
        state.update(&confirmed(
            Message::channel_info(
                channel,
                sender,
                ChannelInfo {
                    name: "testing".into(),
                    description: "a place".into(),
                },
            ),
            2,
        ));

        assert_eq!(state.channel.name, "testing");
        assert_eq!(state.channel.description, "a place");
        // command-only message keeps the snippet but moves the activity marker
        assert_eq!(state.status.snippet, "hello");
        assert_eq!(state.status.message_index, 2);
        assert_eq!(state.status.message_timestamp, 1_002);
    }

    #[test]
    fn empty_info_does_not_clear() {
        let channel = Key::generate().id();
        let sender = Key::generate().id();
        let mut state = ChannelState::new(channel);

        state.update(&confirmed(
            Message::channel_info(channel, sender, ChannelInfo::named("keep")),
            1,
        ));
        state.update(&confirmed(
            Message::channel_info(channel, sender, ChannelInfo::default()),
            2,
        ));
        state.update(&confirmed(Message::new(channel, sender).with_text(""), 3));

        assert_eq!(state.channel.name, "keep");
        assert_eq!(state.status.snippet, "");
        assert_eq!(state.status.message_index, 3);
    }

    #[test]
    fn persisted_state_roundtrip() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        let mut state = ChannelState::new(channel);
        state.update(&confirmed(
            Message::new(channel, Key::generate().id()).with_text("latest"),
            5,
        ));

        db.transact(|tx| save_channel_state(tx, &state)).unwrap();
        assert_eq!(db.channel_state(&channel).unwrap(), Some(state.clone()));
        assert_eq!(db.channel_status(&channel).unwrap(), Some(state.status));
    }

    #[test]
    fn channel_without_status_reads_empty() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        db.transact(|tx| save_channel(tx, &Channel::new(channel)))
            .unwrap();

        assert_eq!(
            db.channel_state(&channel).unwrap(),
            Some(ChannelState::new(channel))
        );
        assert_eq!(db.channel_status(&channel).unwrap(), None);
    }

    #[test]
    fn states_ordered_by_activity() {
        let mut db = Database::open_in_memory().unwrap();
        let sender = Key::generate().id();
        let quiet = Key::generate().id();
        let busy = Key::generate().id();

        let mut a = ChannelState::new(quiet);
        a.update(&confirmed(Message::new(quiet, sender).with_text("old"), 1));
        let mut b = ChannelState::new(busy);
        b.update(&confirmed(Message::new(busy, sender).with_text("new"), 9));

        db.transact(|tx| {
            save_channel_state(tx, &a)?;
            save_channel_state(tx, &b)
        })
        .unwrap();

        let ids: Vec<KeyId> = db
            .channel_states()
            .unwrap()
            .iter()
            .map(|s| *s.id())
            .collect();
        assert_eq!(ids, vec![busy, quiet]);
    }

    #[test]
    fn read_index_only_advances() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();
        db.transact(|tx| save_channel(tx, &Channel::new(channel)))
            .unwrap();

        assert_eq!(db.set_read_index(&channel, 4).unwrap(), 4);
        assert_eq!(db.set_read_index(&channel, 2).unwrap(), 4);
        assert_eq!(db.channel_status(&channel).unwrap().unwrap().read_index, 4);
    }

    #[test]
    fn read_index_of_unknown_channel() {
        let mut db = Database::open_in_memory().unwrap();
        let channel = Key::generate().id();

        assert!(matches!(
            db.set_read_index(&channel, 1),
            Err(StoreError::NotFound)
        ));
        assert_eq!(db.channel_status(&channel).unwrap(), None);
    }
}
