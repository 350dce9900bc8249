//! Interfaces to the remote collaborators: the keyring that holds key
//! material and channel membership, and the relay transport that stores
//! opaque encrypted events per channel.

use async_trait::async_trait;
use hush_shared::{Key, KeyId, KeyRecord};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Keyring error: {0}")]
    Keyring(String),
}

/// One encrypted event as stored by the relay.
///
/// `index` and `timestamp` are assigned by the relay and are not
/// authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub data: Vec<u8>,
    pub index: i64,
    pub timestamp: i64,
}

#[async_trait]
pub trait Keyring: Send + Sync {
    /// Register a channel key with the relay and return its record, token
    /// included. Registering an already known channel returns the existing
    /// record.
    async fn register_channel(&self, channel: &Key) -> Result<KeyRecord, RemoteError>;

    /// Look a key up in the local copy of the keyring.
    fn key(&self, id: &KeyId) -> Result<Option<KeyRecord>, RemoteError>;

    /// Store a record locally; pushed on the next [`Keyring::sync`].
    fn set(&self, record: KeyRecord) -> Result<(), RemoteError>;

    /// Forget a key locally; pushed on the next [`Keyring::sync`].
    fn remove(&self, id: &KeyId) -> Result<(), RemoteError>;

    /// Push local edits and pull the account's records.
    async fn sync(&self) -> Result<(), RemoteError>;

    /// Channels with new events since the last call.
    async fn changes(&self) -> Result<Vec<KeyId>, RemoteError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Events with an index greater than `since`, in log order.
    async fn fetch_events(&self, channel: &KeyId, since: i64) -> Result<Vec<Event>, RemoteError>;

    /// Append an envelope; returns the relay index and timestamp it got.
    async fn append_event(
        &self,
        channel: &KeyId,
        envelope: Vec<u8>,
    ) -> Result<(i64, i64), RemoteError>;
}
