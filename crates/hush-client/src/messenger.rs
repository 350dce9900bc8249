//! The sync engine.
//!
//! [`Messenger`] owns the local replica and reconciles it with the relay.
//! Writes go through [`Database::transact`] so a failed step leaves nothing
//! behind, and a per-instance async lock keeps sends and syncs from
//! interleaving. The store handle itself sits behind a short-lived std mutex
//! that is never held across an await.

use std::sync::Mutex;

use hush_shared::{
    decrypt_message, ChannelInfo, ChannelInvite, Key, KeyId, KeyRecord, Message,
    PENDING_REMOTE_INDEX,
};
use hush_store::{
    clear_sync_pending, delete_channel, enqueue_outgoing, insert_channel_if_absent,
    load_channel_state, mark_sync_pending, merge_remote_message, save_channel_state,
    set_sync_position, upsert_message, Channel, ChannelState, Database, StoreError, User,
    Visibility,
};

use crate::config::MessengerConfig;
use crate::error::{Error, Result};
use crate::remote::{Event, Keyring, Transport};

pub struct Messenger<K, T> {
    keyring: K,
    transport: T,
    db: Mutex<Option<Database>>,
    sync_lock: tokio::sync::Mutex<()>,
}

fn open_database(config: &MessengerConfig) -> Result<Database> {
    let db = Database::open_at(&config.db_path)?;
    db.set_busy_timeout(config.busy_timeout)?;
    Ok(db)
}

impl<K: Keyring, T: Transport> Messenger<K, T> {
    /// Open the local replica and wire up the remote collaborators.
    pub fn open(config: &MessengerConfig, keyring: K, transport: T) -> Result<Self> {
        let db = open_database(config)?;
        tracing::info!(path = %config.db_path.display(), "messenger opened");

        Ok(Self {
            keyring,
            transport,
            db: Mutex::new(Some(db)),
            sync_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn keyring(&self) -> &K {
        &self.keyring
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ------------------------------------------------------------------
    // Store handle
    // ------------------------------------------------------------------

    /// Close the replica. Every operation fails with [`Error::Locked`] until
    /// [`Messenger::unlock`].
    pub fn lock(&self) -> Result<()> {
        let mut guard = self.db.lock().map_err(|_| Error::StoreUnavailable)?;
        if guard.take().is_some() {
            tracing::info!("messenger locked");
        }
        Ok(())
    }

    pub fn unlock(&self, config: &MessengerConfig) -> Result<()> {
        let db = open_database(config)?;
        let mut guard = self.db.lock().map_err(|_| Error::StoreUnavailable)?;
        *guard = Some(db);
        tracing::info!("messenger unlocked");
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.db.lock().as_deref(), Ok(None))
    }

    fn with_db<R>(&self, f: impl FnOnce(&mut Database) -> hush_store::Result<R>) -> Result<R> {
        let mut guard = self.db.lock().map_err(|_| Error::StoreUnavailable)?;
        let db = guard.as_mut().ok_or(Error::Locked)?;
        Ok(f(db)?)
    }

    fn ensure_unlocked(&self) -> Result<()> {
        self.with_db(|_| Ok(()))
    }

    // ------------------------------------------------------------------
    // Keys and channels
    // ------------------------------------------------------------------

    /// Register a channel key with the keyring and create the local channel.
    /// Calling it again for the same key changes nothing.
    pub async fn add_channel(&self, key: &Key) -> Result<Channel> {
        let _guard = self.sync_lock.lock().await;
        self.ensure_unlocked()?;

        let record = self.keyring.register_channel(key).await?;
        let id = record.id;
        let created =
            self.with_db(|db| db.transact(|tx| insert_channel_if_absent(tx, &Channel::new(id))))?;
        if created {
            tracing::info!(channel = %id.short(), "added channel");
        }

        self.with_db(|db| db.channel(&id))?
            .ok_or(Error::Store(StoreError::NotFound))
    }

    /// Make a key (usually the user's own) available for sending.
    pub fn add_key(&self, key: &Key) -> Result<()> {
        self.keyring.set(KeyRecord::from(key))?;
        Ok(())
    }

    /// Seal a channel key to `recipient`, carrying the membership token and
    /// the channel's current name and description.
    pub fn invite(
        &self,
        channel: &KeyId,
        sender: &KeyId,
        recipient: &KeyId,
    ) -> Result<ChannelInvite> {
        let record = self
            .keyring
            .key(channel)?
            .ok_or(Error::KeyNotFound(*channel))?;
        let key = record.key().ok_or(Error::KeyNotFound(*channel))?;
        let token = record.token.clone().unwrap_or_default();

        let info = self.with_db(|db| db.channel(channel))?.map(|c| ChannelInfo {
            name: c.name,
            description: c.description,
        });

        Ok(ChannelInvite::new(&key, recipient, sender, token, info)?)
    }

    /// Join a channel from an invite addressed to one of our keys, then pull
    /// its history.
    pub async fn accept_invite(&self, invite: &ChannelInvite) -> Result<Channel> {
        let _guard = self.sync_lock.lock().await;
        self.ensure_unlocked()?;

        let recipient = self
            .keyring
            .key(&invite.recipient)?
            .and_then(|r| r.key())
            .ok_or(Error::KeyNotFound(invite.recipient))?;
        let record = invite.open(&recipient)?;
        self.keyring.set(record)?;
        self.keyring.sync().await?;

        let mut channel = Channel::new(invite.channel);
        if let Some(info) = &invite.info {
            channel.name = info.name.clone();
            channel.description = info.description.clone();
        }
        self.with_db(|db| db.transact(|tx| insert_channel_if_absent(tx, &channel)))?;
        tracing::info!(
            channel = %invite.channel.short(),
            from = %invite.sender.short(),
            "accepted invite"
        );

        self.sync_channel_locked(&invite.channel).await?;
        self.with_db(|db| db.channel(&invite.channel))?
            .ok_or(Error::Store(StoreError::NotFound))
    }

    /// Forget the channel key, drop the channel and its messages, and push
    /// the removal to the keyring.
    pub async fn leave_channel(&self, channel: &KeyId) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        self.ensure_unlocked()?;

        self.remove_channel(channel)?;
        self.keyring.sync().await?;
        tracing::info!(channel = %channel.short(), "left channel");
        Ok(())
    }

    /// Like [`Messenger::leave_channel`] without the keyring sync.
    pub async fn delete_channel(&self, channel: &KeyId) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        self.ensure_unlocked()?;
        self.remove_channel(channel)
    }

    fn remove_channel(&self, channel: &KeyId) -> Result<()> {
        self.keyring.remove(channel)?;
        self.with_db(|db| db.transact(|tx| delete_channel(tx, channel)))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Store `msg` as pending and queue its envelope, without touching the
    /// network.
    pub async fn set(&self, msg: Message) -> Result<Message> {
        let _guard = self.sync_lock.lock().await;
        self.set_locked(msg)
    }

    /// [`Messenger::set`] followed by a sync of the message's channel. If the
    /// sync fails the message stays pending and is delivered by a later sync.
    pub async fn send(&self, msg: Message) -> Result<Message> {
        let _guard = self.sync_lock.lock().await;
        let pending = self.set_locked(msg)?;
        self.sync_channel_locked(&pending.channel).await?;

        Ok(self.with_db(|db| db.message(&pending.id))?.unwrap_or(pending))
    }

    fn set_locked(&self, msg: Message) -> Result<Message> {
        self.ensure_unlocked()?;

        self.keyring
            .key(&msg.channel)?
            .ok_or(Error::KeyNotFound(msg.channel))?;
        let sender = self
            .keyring
            .key(&msg.sender)?
            .and_then(|r| r.key())
            .ok_or(Error::KeyNotFound(msg.sender))?;

        let envelope = msg.encrypt(&sender, &msg.channel)?;
        let mut pending = msg;
        pending.remote_index = PENDING_REMOTE_INDEX;

        self.with_db(|db| {
            db.transact(|tx| {
                insert_channel_if_absent(tx, &Channel::new(pending.channel))?;
                upsert_message(tx, &pending)?;
                enqueue_outgoing(tx, &pending.channel, &pending.id, &envelope)?;
                Ok(())
            })
        })?;

        tracing::debug!(
            channel = %pending.channel.short(),
            message = %pending.id,
            size = envelope.len(),
            "queued message"
        );
        Ok(pending)
    }

    // ------------------------------------------------------------------
    // Syncing
    // ------------------------------------------------------------------

    /// Sync the keyring, then every channel that changed remotely or still
    /// has queued messages.
    ///
    /// A failing channel does not stop the others; channels that synced stay
    /// committed and the first error is returned. Reported changes are
    /// recorded before any channel is synced, so a channel that failed is
    /// visited again by the next call.
    pub async fn sync(&self) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        self.ensure_unlocked()?;

        self.keyring.sync().await?;
        let changed = self.keyring.changes().await?;
        self.with_db(|db| {
            db.transact(|tx| {
                for channel in &changed {
                    mark_sync_pending(tx, channel)?;
                }
                Ok(())
            })
        })?;

        let mut channels = Vec::new();
        for channel in self.with_db(|db| db.pending_syncs())? {
            if self.keyring.key(&channel)?.is_some() {
                channels.push(channel);
            } else {
                // left since it was reported
                self.with_db(|db| db.transact(|tx| clear_sync_pending(tx, &channel)))?;
            }
        }
        for channel in self.with_db(|db| db.channels())? {
            if channels.contains(&channel.id) {
                continue;
            }
            if !self.with_db(|db| db.outgoing(&channel.id))?.is_empty() {
                channels.push(channel.id);
            }
        }

        let mut first_err = None;
        for channel in &channels {
            if let Err(e) = self.sync_channel_locked(channel).await {
                tracing::warn!(channel = %channel.short(), error = %e, "channel sync failed");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn sync_channel(&self, channel: &KeyId) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        self.ensure_unlocked()?;
        self.sync_channel_locked(channel).await
    }

    async fn sync_channel_locked(&self, channel: &KeyId) -> Result<()> {
        let key = self
            .keyring
            .key(channel)?
            .and_then(|r| r.key())
            .ok_or(Error::KeyNotFound(*channel))?;

        self.push_outgoing(channel).await?;

        let since = self.with_db(|db| db.sync_position(channel))?;
        let events = self.transport.fetch_events(channel, since).await?;

        // Verify the whole batch before writing any of it.
        let mut messages = Vec::with_capacity(events.len());
        for event in &events {
            messages.push(open_event(event, channel, &key)?);
        }
        messages.sort_by_key(|m| (m.remote_index, m.timestamp));
        let position = messages.last().map(|m| m.remote_index);

        let folded = self.with_db(|db| {
            db.transact(|tx| {
                insert_channel_if_absent(tx, &Channel::new(*channel))?;
                let mut state = load_channel_state(tx, channel)?
                    .unwrap_or_else(|| ChannelState::new(*channel));

                let mut folded = 0;
                for msg in &messages {
                    if !merge_remote_message(tx, msg)? {
                        continue;
                    }
                    // replayed events were folded already
                    if msg.remote_index > state.status.message_index {
                        state.update(msg);
                        folded += 1;
                    }
                }

                if folded > 0 {
                    save_channel_state(tx, &state)?;
                }
                if let Some(position) = position {
                    set_sync_position(tx, channel, position)?;
                }
                clear_sync_pending(tx, channel)?;
                Ok(folded)
            })
        })?;

        tracing::info!(
            channel = %channel.short(),
            since,
            events = events.len(),
            folded,
            "synced channel"
        );
        Ok(())
    }

    /// Append queued envelopes to the relay, oldest first. A queue row is
    /// dropped only after the relay accepted it.
    async fn push_outgoing(&self, channel: &KeyId) -> Result<()> {
        let queued = self.with_db(|db| db.outgoing(channel))?;

        for entry in queued {
            let (index, _) = self
                .transport
                .append_event(channel, entry.envelope)
                .await?;
            self.with_db(|db| db.remove_outgoing(entry.id))?;
            tracing::debug!(
                channel = %channel.short(),
                message = %entry.message_id,
                index,
                "delivered queued message"
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads and local-only state
    // ------------------------------------------------------------------

    pub fn messages(&self, channel: &KeyId) -> Result<Vec<Message>> {
        self.with_db(|db| db.messages(channel))
    }

    pub fn message(&self, id: &str) -> Result<Option<Message>> {
        self.with_db(|db| db.message(id))
    }

    pub fn channel(&self, id: &KeyId) -> Result<Option<Channel>> {
        self.with_db(|db| db.channel(id))
    }

    pub fn channels(&self) -> Result<Vec<Channel>> {
        self.with_db(|db| db.channels())
    }

    pub fn channel_status(&self, id: &KeyId) -> Result<Option<ChannelState>> {
        self.with_db(|db| db.channel_state(id))
    }

    /// Most recently active first.
    pub fn channel_statuses(&self) -> Result<Vec<ChannelState>> {
        self.with_db(|db| db.channel_states())
    }

    pub fn set_channel_visibility(&self, id: &KeyId, visibility: Visibility) -> Result<bool> {
        self.with_db(|db| db.set_channel_visibility(id, visibility))
    }

    pub fn set_channel_topic(&self, id: &KeyId, topic: &str) -> Result<bool> {
        self.with_db(|db| db.set_channel_topic(id, topic))
    }

    /// Returns the read cursor after the call; it never moves back.
    pub fn mark_read(&self, channel: &KeyId, index: i64) -> Result<i64> {
        self.with_db(|db| db.set_read_index(channel, index))
    }

    /// IDs of messages whose text contains every word of `text`.
    pub fn search(&self, text: &str) -> Result<Vec<String>> {
        self.with_db(|db| db.search(text))
    }

    pub fn add_user(&self, user: &User) -> Result<()> {
        self.with_db(|db| db.add_user(user))
    }

    pub fn user(&self, kid: &KeyId) -> Result<User> {
        self.with_db(|db| db.user(kid))
    }

    pub fn users(&self) -> Result<Vec<User>> {
        self.with_db(|db| db.users())
    }
}

/// Decrypt one relay event and attach the relay's metadata.
fn open_event(event: &Event, channel: &KeyId, key: &Key) -> Result<Message> {
    if event.index <= 0 || event.index == PENDING_REMOTE_INDEX {
        return Err(Error::InvalidEvent(format!("relay index {}", event.index)));
    }

    let mut msg = decrypt_message(&event.data, key)?;
    if msg.channel != *channel {
        return Err(Error::ChannelMismatch {
            expected: *channel,
            actual: msg.channel,
        });
    }

    msg.remote_index = event.index;
    msg.remote_timestamp = event.timestamp;

    tracing::debug!(
        channel = %channel.short(),
        index = event.index,
        message = %msg.id,
        sender = %msg.sender.short(),
        "decrypted event"
    );
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_shared::{CryptoError, MessageError};

    fn key() -> Key {
        Key::generate()
    }

    #[test]
    fn rejects_sentinel_and_zero_indexes() {
        let channel = key();
        for index in [0, -3, PENDING_REMOTE_INDEX] {
            let event = Event {
                data: vec![0; 64],
                index,
                timestamp: 1,
            };
            assert!(matches!(
                open_event(&event, &channel.id(), &channel),
                Err(Error::InvalidEvent(_))
            ));
        }
    }

    #[test]
    fn rejects_message_for_another_channel() {
        let alice = key();
        let channel = key();
        let elsewhere = key().id();
        // addressed to `channel` but claims to belong elsewhere
        let msg = Message::new(elsewhere, alice.id()).with_text("wrong room");
        let event = Event {
            data: msg.encrypt(&alice, &channel.id()).unwrap(),
            index: 1,
            timestamp: 1,
        };

        assert!(matches!(
            open_event(&event, &channel.id(), &channel),
            Err(Error::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn attaches_relay_metadata() {
        let alice = key();
        let channel = key();
        let msg = Message::new(channel.id(), alice.id()).with_text("hi");
        let event = Event {
            data: msg.encrypt(&alice, &channel.id()).unwrap(),
            index: 7,
            timestamp: 7_000,
        };

        let opened = open_event(&event, &channel.id(), &channel).unwrap();
        assert_eq!(opened.remote_index, 7);
        assert_eq!(opened.remote_timestamp, 7_000);
        assert_eq!(opened.text(), Some("hi"));
    }

    #[test]
    fn garbage_is_a_crypto_error() {
        let channel = key();
        let event = Event {
            data: vec![7; 10],
            index: 1,
            timestamp: 1,
        };
        assert!(matches!(
            open_event(&event, &channel.id(), &channel),
            Err(Error::Message(MessageError::Crypto(
                CryptoError::DecryptionFailed | CryptoError::MalformedEnvelope(_)
            )))
        ));
    }
}
