use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::types::KeyId;

/// An X25519 key pair. Senders, recipients and channels are all keyed this
/// way; the public key doubles as the [`KeyId`].
#[derive(Clone)]
pub struct Key {
    secret: StaticSecret,
    public: PublicKey,
}

impl Key {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Restore a key pair from secret bytes
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(seed))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn id(&self) -> KeyId {
        KeyId(self.public.to_bytes())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key").field("id", &self.id()).finish_non_exhaustive()
    }
}

impl KeyId {
    /// Interpret the identifier as the X25519 public key it was derived from.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<&PublicKey> for KeyId {
    fn from(pk: &PublicKey) -> Self {
        KeyId(pk.to_bytes())
    }
}

/// What the keyring stores for a key: its identifier, the secret when this
/// replica holds it, and the channel membership token handed out by the relay.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyRecord {
    pub id: KeyId,
    pub secret: Option<[u8; 32]>,
    pub token: Option<String>,
}

impl KeyRecord {
    /// Public-only record, e.g. for another user's key.
    pub fn public(id: KeyId) -> Self {
        Self {
            id,
            secret: None,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The key pair, if the secret is known and matches the identifier.
    pub fn key(&self) -> Option<Key> {
        let key = Key::from_seed(self.secret?);
        (key.id() == self.id).then_some(key)
    }
}

impl From<&Key> for KeyRecord {
    fn from(key: &Key) -> Self {
        Self {
            id: key.id(),
            secret: Some(key.secret_bytes()),
            token: None,
        }
    }
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("id", &self.id)
            .field("has_secret", &self.secret.is_some())
            .field("token", &self.token)
            .finish()
    }
}
