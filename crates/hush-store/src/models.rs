//! Domain model structs persisted in the local database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer. Messages use [`hush_shared::Message`] as-is.

use hush_shared::KeyId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Local UI filter, independent of message history.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

impl Visibility {
    pub fn to_i64(self) -> i64 {
        match self {
            Visibility::Visible => 0,
            Visibility::Hidden => 1,
        }
    }

    // unknown values from newer schemas read as visible
    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Visibility::Hidden,
            _ => Visibility::Visible,
        }
    }
}

/// A channel registered with this replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    /// The channel key id.
    pub id: KeyId,
    /// Owning team, if any.
    pub team: Option<KeyId>,
    pub name: String,
    pub description: String,
    pub topic: String,
    pub visibility: Visibility,
}

impl Channel {
    pub fn new(id: KeyId) -> Self {
        Self {
            id,
            team: None,
            name: String::new(),
            description: String::new(),
            topic: String::new(),
            visibility: Visibility::Visible,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel status
// ---------------------------------------------------------------------------

/// Activity summary of a channel, derived from its messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelStatus {
    pub channel: KeyId,
    /// Text of the latest message that had any.
    pub snippet: String,
    /// Relay index of the latest folded message.
    pub message_index: i64,
    /// Relay timestamp of the latest folded message.
    pub message_timestamp: i64,
    /// How far the local user has read.
    pub read_index: i64,
}

impl ChannelStatus {
    pub fn new(channel: KeyId) -> Self {
        Self {
            channel,
            snippet: String::new(),
            message_index: 0,
            message_timestamp: 0,
            read_index: 0,
        }
    }

    pub fn unread(&self) -> bool {
        self.message_index > self.read_index
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A known user: key id and the username the directory vouched for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub kid: KeyId,
    pub username: String,
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// An envelope written locally and waiting to be appended to the relay log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: i64,
    pub channel: KeyId,
    pub message_id: String,
    pub envelope: Vec<u8>,
}
