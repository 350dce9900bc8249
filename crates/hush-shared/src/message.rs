//! Chat message model and its encrypt/decrypt pipeline.

use serde::{Deserialize, Serialize};

use crate::cipher::{decrypt_sender_box, SenderBox};
use crate::command::{ChannelInfo, ChannelInvite, MessageCommand};
use crate::constants::PENDING_REMOTE_INDEX;
use crate::error::MessageError;
use crate::keys::Key;
use crate::types::{new_message_id, now_millis, KeyId};

/// A single chat message.
///
/// Everything except `remote_index` and `remote_timestamp` is covered by the
/// sender box. Those two are assigned by the relay and are only as trustworthy
/// as the relay itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Random ID (32 bytes, base64url), assigned once at creation.
    pub id: String,
    pub channel: KeyId,
    pub sender: KeyId,
    /// Sender clock, Unix milliseconds.
    pub timestamp: i64,
    /// ID of the preceding message, as a causal hint.
    pub prev: Option<String>,
    pub text: Option<String>,
    pub command: Option<MessageCommand>,
    /// Relay sequence number; 0 until known, [`PENDING_REMOTE_INDEX`] while pending.
    pub remote_index: i64,
    /// Relay receipt time, Unix milliseconds.
    pub remote_timestamp: i64,
}

/// Encrypted portion of a message. Kept separate from [`Message`] so the
/// relay-assigned fields can never end up inside an envelope.
#[derive(Serialize, Deserialize)]
struct Payload {
    id: String,
    channel: KeyId,
    sender: KeyId,
    timestamp: i64,
    prev: Option<String>,
    text: Option<String>,
    command: Option<MessageCommand>,
}

impl Message {
    pub fn new(channel: KeyId, sender: KeyId) -> Self {
        Self {
            id: new_message_id(),
            channel,
            sender,
            timestamp: now_millis(),
            prev: None,
            text: None,
            command: None,
            remote_index: 0,
            remote_timestamp: 0,
        }
    }

    pub fn channel_info(channel: KeyId, sender: KeyId, info: ChannelInfo) -> Self {
        Self::new(channel, sender).with_command(MessageCommand::ChannelInfo(info))
    }

    pub fn channel_invites(channel: KeyId, sender: KeyId, invites: Vec<ChannelInvite>) -> Self {
        Self::new(channel, sender).with_command(MessageCommand::ChannelInvites(invites))
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_command(mut self, command: MessageCommand) -> Self {
        self.command = Some(command);
        self
    }

    pub fn with_prev(mut self, prev: impl Into<String>) -> Self {
        self.prev = Some(prev.into());
        self
    }

    /// Written locally but not yet confirmed by the relay.
    pub fn is_pending(&self) -> bool {
        self.remote_index == PENDING_REMOTE_INDEX
    }

    /// Non-empty display text, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// Serialize the encrypted portion to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let payload = Payload {
            id: self.id.clone(),
            channel: self.channel,
            sender: self.sender,
            timestamp: self.timestamp,
            prev: self.prev.clone(),
            text: self.text.clone(),
            command: self.command.clone(),
        };
        Ok(bincode::serialize(&payload)?)
    }

    /// Deserialize a payload; remote fields start out zero.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MessageError> {
        let payload: Payload = bincode::deserialize(data)?;
        Ok(Self {
            id: payload.id,
            channel: payload.channel,
            sender: payload.sender,
            timestamp: payload.timestamp,
            prev: payload.prev,
            text: payload.text,
            command: payload.command,
            remote_index: 0,
            remote_timestamp: 0,
        })
    }

    /// Encrypt for `recipient` (usually the channel key) as `sender`.
    pub fn encrypt(&self, sender: &Key, recipient: &KeyId) -> Result<Vec<u8>, MessageError> {
        if self.remote_timestamp != 0 {
            return Err(MessageError::Invalid("remote timestamp is set".into()));
        }
        if self.remote_index != 0 {
            return Err(MessageError::Invalid("remote index is set".into()));
        }
        if self.timestamp == 0 {
            return Err(MessageError::Invalid("timestamp is not set".into()));
        }
        if self.id.is_empty() {
            return Err(MessageError::Invalid("id is not set".into()));
        }
        if self.sender != sender.id() {
            return Err(MessageError::Invalid(format!(
                "sender {} does not match key {}",
                self.sender.short(),
                sender.id().short()
            )));
        }

        let plaintext = self.to_bytes()?;
        Ok(SenderBox::new(sender).encrypt(&plaintext, &recipient.public_key())?)
    }
}

/// Decrypt an envelope and check that the claimed sender actually wrote it.
pub fn decrypt_message(envelope: &[u8], recipient: &Key) -> Result<Message, MessageError> {
    let (plaintext, sender_pk) = decrypt_sender_box(envelope, recipient)?;
    let message = Message::from_bytes(&plaintext)?;

    let actual = KeyId::from(&sender_pk);
    if message.sender != actual {
        return Err(MessageError::SenderMismatch {
            claimed: message.sender,
            actual,
        });
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> (Key, Key) {
        (Key::from_seed([0x01; 32]), Key::from_seed([0xa0; 32]))
    }

    #[test]
    fn test_encrypt_decrypt() {
        let (alice, channel) = keys();
        let msg = Message::new(channel.id(), alice.id())
            .with_text("hi bob")
            .with_prev("previous-id");

        let envelope = msg.encrypt(&alice, &channel.id()).unwrap();
        let out = decrypt_message(&envelope, &channel).unwrap();
        assert_eq!(out, msg);
    }

    #[test]
    fn test_command_survives_encryption() {
        let (alice, channel) = keys();
        let msg = Message::channel_info(channel.id(), alice.id(), ChannelInfo::named("testing"));

        let envelope = msg.encrypt(&alice, &channel.id()).unwrap();
        let out = decrypt_message(&envelope, &channel).unwrap();
        assert_eq!(
            out.command.as_ref().and_then(|c| c.channel_info()),
            Some(&ChannelInfo::named("testing"))
        );
        assert!(out.text().is_none());
    }

    #[test]
    fn test_invites_survive_encryption() {
        let (alice, channel) = keys();
        let bob = Key::from_seed([0x02; 32]);
        let invite = ChannelInvite::new(
            &channel,
            &bob.id(),
            &alice.id(),
            "tok",
            Some(ChannelInfo::named("testing")),
        )
        .unwrap();
        let msg = Message::channel_invites(channel.id(), alice.id(), vec![invite.clone()]);

        let envelope = msg.encrypt(&alice, &channel.id()).unwrap();
        let out = decrypt_message(&envelope, &channel).unwrap();
        assert_eq!(out, msg);

        let invites = out.command.as_ref().map(|c| c.channel_invites()).unwrap();
        assert_eq!(invites, [invite]);
        assert!(out.command.as_ref().unwrap().channel_info().is_none());
        assert_eq!(invites[0].open(&bob).unwrap().id, channel.id());
    }

    #[test]
    fn test_remote_fields_rejected() {
        let (alice, channel) = keys();

        let mut msg = Message::new(channel.id(), alice.id());
        msg.remote_index = 4;
        assert!(matches!(
            msg.encrypt(&alice, &channel.id()),
            Err(MessageError::Invalid(_))
        ));

        let mut msg = Message::new(channel.id(), alice.id());
        msg.remote_timestamp = 1_700_000_000_000;
        assert!(matches!(
            msg.encrypt(&alice, &channel.id()),
            Err(MessageError::Invalid(_))
        ));

        let mut msg = Message::new(channel.id(), alice.id());
        msg.remote_index = PENDING_REMOTE_INDEX;
        assert!(msg.encrypt(&alice, &channel.id()).is_err());
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let (alice, channel) = keys();
        let mut msg = Message::new(channel.id(), alice.id());
        msg.timestamp = 0;
        assert!(matches!(
            msg.encrypt(&alice, &channel.id()),
            Err(MessageError::Invalid(_))
        ));
    }

    #[test]
    fn test_sender_must_match_key() {
        let (alice, channel) = keys();
        let bob = Key::from_seed([0x02; 32]);
        let msg = Message::new(channel.id(), bob.id()).with_text("spoof");
        assert!(matches!(
            msg.encrypt(&alice, &channel.id()),
            Err(MessageError::Invalid(_))
        ));
    }

    #[test]
    fn test_sender_mismatch_detected() {
        let (alice, channel) = keys();
        let bob = Key::from_seed([0x02; 32]);

        // alice encrypts a payload claiming to be from bob, bypassing the
        // precondition in Message::encrypt
        let msg = Message::new(channel.id(), bob.id()).with_text("it's bob");
        let envelope = SenderBox::new(&alice)
            .encrypt(&msg.to_bytes().unwrap(), channel.public_key())
            .unwrap();

        match decrypt_message(&envelope, &channel) {
            Err(MessageError::SenderMismatch { claimed, actual }) => {
                assert_eq!(claimed, bob.id());
                assert_eq!(actual, alice.id());
            }
            other => panic!("expected sender mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_remote_fields_not_encrypted() {
        let (alice, channel) = keys();
        let msg = Message::new(channel.id(), alice.id()).with_text("x");
        let mut copy = msg.clone();
        copy.remote_index = 9;
        copy.remote_timestamp = 9;
        assert_eq!(msg.to_bytes().unwrap(), copy.to_bytes().unwrap());
        assert_eq!(Message::from_bytes(&copy.to_bytes().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_garbage_payload_is_encoding_error() {
        let (alice, channel) = keys();
        let envelope = SenderBox::new(&alice)
            .encrypt(&[0xff, 0xff, 0xff], channel.public_key())
            .unwrap();
        assert!(matches!(
            decrypt_message(&envelope, &channel),
            Err(MessageError::Encoding(_))
        ));
    }
}
