//! Sender box: `seal(sender_pk || box(plaintext))`.
//!
//! The inner box proves which key pair wrote the payload; the outer seal hides
//! that key from anyone who cannot open it. The reader learns the sender's
//! public key only after opening, and must then compare it with whatever
//! identity the payload claims.

use x25519_dalek::PublicKey;

use crate::constants::{MAX_MESSAGE_SIZE, PUBKEY_SIZE};
use crate::crypto::{box_open, box_seal, seal, seal_open};
use crate::error::CryptoError;
use crate::keys::Key;

/// Encrypts on behalf of one sender key.
#[derive(Debug, Clone)]
pub struct SenderBox<'a> {
    sender: &'a Key,
}

impl<'a> SenderBox<'a> {
    pub fn new(sender: &'a Key) -> Self {
        Self { sender }
    }

    pub fn encrypt(&self, plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() > MAX_MESSAGE_SIZE {
            return Err(CryptoError::EncryptionFailed);
        }

        let boxed = box_seal(plaintext, recipient, self.sender.secret())?;

        let mut bundle = Vec::with_capacity(PUBKEY_SIZE + boxed.len());
        bundle.extend_from_slice(self.sender.public_key().as_bytes());
        bundle.extend_from_slice(&boxed);

        seal(&bundle, recipient)
    }
}

/// Open a sender box, returning the plaintext and the sender's public key.
pub fn decrypt_sender_box(
    envelope: &[u8],
    recipient: &Key,
) -> Result<(Vec<u8>, PublicKey), CryptoError> {
    let bundle = seal_open(envelope, recipient)?;
    if bundle.len() < PUBKEY_SIZE {
        return Err(CryptoError::MalformedEnvelope(format!(
            "expected at least {PUBKEY_SIZE} bytes, got {}",
            bundle.len()
        )));
    }

    let (sender_bytes, boxed) = bundle.split_at(PUBKEY_SIZE);
    let mut sender = [0u8; PUBKEY_SIZE];
    sender.copy_from_slice(sender_bytes);
    let sender = PublicKey::from(sender);

    let plaintext = box_open(boxed, &sender, recipient.secret())?;
    Ok((plaintext, sender))
}
