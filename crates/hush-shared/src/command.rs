use serde::{Deserialize, Serialize};

use crate::crypto::{seal, seal_open};
use crate::error::{CryptoError, MessageError};
use crate::keys::{Key, KeyRecord};
use crate::types::KeyId;

/// Structured payload a message can carry in addition to (or instead of) text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageCommand {
    /// Set the channel name and/or description.
    ChannelInfo(ChannelInfo),
    /// Invite recipients to a channel.
    ChannelInvites(Vec<ChannelInvite>),
}

impl MessageCommand {
    /// Serialize to binary (bincode), as stored in the `command` column
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    pub fn channel_info(&self) -> Option<&ChannelInfo> {
        match self {
            MessageCommand::ChannelInfo(info) => Some(info),
            _ => None,
        }
    }

    pub fn channel_invites(&self) -> &[ChannelInvite] {
        match self {
            MessageCommand::ChannelInvites(invites) => invites,
            _ => &[],
        }
    }
}

/// Channel display metadata. Empty fields mean "leave unchanged".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub description: String,
}

impl ChannelInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
        }
    }
}

/// Invitation to join a channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInvite {
    pub channel: KeyId,
    pub recipient: KeyId,
    pub sender: KeyId,
    /// Channel secret sealed to the recipient's key
    pub key: Vec<u8>,
    /// Membership token for the relay
    pub token: String,
    pub info: Option<ChannelInfo>,
}

impl ChannelInvite {
    pub fn new(
        channel: &Key,
        recipient: &KeyId,
        sender: &KeyId,
        token: impl Into<String>,
        info: Option<ChannelInfo>,
    ) -> Result<Self, CryptoError> {
        let key = seal(&channel.secret_bytes(), &recipient.public_key())?;
        Ok(Self {
            channel: channel.id(),
            recipient: *recipient,
            sender: *sender,
            key,
            token: token.into(),
            info,
        })
    }

    /// Recover the channel key with the recipient's key pair.
    pub fn open(&self, recipient: &Key) -> Result<KeyRecord, MessageError> {
        if recipient.id() != self.recipient {
            return Err(MessageError::Invalid(format!(
                "invite is addressed to {}",
                self.recipient.short()
            )));
        }

        let secret = seal_open(&self.key, recipient)?;
        let secret: [u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| MessageError::Invalid("invite key has wrong length".into()))?;

        let record = KeyRecord {
            id: self.channel,
            secret: Some(secret),
            token: Some(self.token.clone()),
        };
        if record.key().is_none() {
            return Err(MessageError::Invalid(
                "invite key does not match channel".into(),
            ));
        }
        Ok(record)
    }
}
