//! Public-key primitives behind the sender box.
//!
//! `box` authenticates both parties: the key comes from the X25519 agreement
//! between the sender secret and the recipient public key. `seal` only needs
//! the recipient public key; a fresh ephemeral key pair is generated per call
//! and its public half travels in front of the ciphertext.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{
    KDF_CONTEXT_BOX, KDF_CONTEXT_SEAL, KDF_CONTEXT_SEAL_NONCE, NONCE_SIZE, PUBKEY_SIZE, TAG_SIZE,
};
use crate::error::CryptoError;
use crate::keys::Key;

pub type SymmetricKey = [u8; 32];

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce_bytes = generate_nonce();
    let ciphertext = encrypt_with_nonce(key, &nonce_bytes, plaintext)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    decrypt_with_nonce(key, nonce_bytes, ciphertext)
}

fn encrypt_with_nonce(
    key: &SymmetricKey,
    nonce: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

fn decrypt_with_nonce(
    key: &SymmetricKey,
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// X25519 agreement; a low-order peer key yields an all-zero secret, refuse it
fn agree(secret: &StaticSecret, public: &PublicKey) -> Option<[u8; 32]> {
    let shared = secret.diffie_hellman(public);
    shared.was_contributory().then(|| *shared.as_bytes())
}

fn box_key(shared: &[u8; 32]) -> SymmetricKey {
    blake3::derive_key(KDF_CONTEXT_BOX, shared)
}

/// Authenticated encryption from `sender` to `recipient`.
///
/// Output: nonce (24) || ciphertext.
pub fn box_seal(
    plaintext: &[u8],
    recipient: &PublicKey,
    sender: &StaticSecret,
) -> Result<Vec<u8>, CryptoError> {
    let shared = agree(sender, recipient).ok_or(CryptoError::InvalidKey)?;
    encrypt(&box_key(&shared), plaintext)
}

/// Open a [`box_seal`] output. Fails unless it was produced by the secret
/// matching `sender` for the public key matching `recipient`.
pub fn box_open(
    data: &[u8],
    sender: &PublicKey,
    recipient: &StaticSecret,
) -> Result<Vec<u8>, CryptoError> {
    let shared = agree(recipient, sender).ok_or(CryptoError::DecryptionFailed)?;
    decrypt(&box_key(&shared), data)
}

fn seal_key_and_nonce(
    shared: &[u8; 32],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> (SymmetricKey, [u8; NONCE_SIZE]) {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SEAL);
    hasher.update(shared);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    let key = *hasher.finalize().as_bytes();

    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SEAL_NONCE);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&hasher.finalize().as_bytes()[..NONCE_SIZE]);

    (key, nonce)
}

/// Anonymous encryption to `recipient`.
///
/// Output: ephemeral public key (32) || ciphertext.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_pk = PublicKey::from(&ephemeral);
    let shared = agree(&ephemeral, recipient).ok_or(CryptoError::InvalidKey)?;

    let (key, nonce) = seal_key_and_nonce(&shared, &ephemeral_pk, recipient);
    let ciphertext = encrypt_with_nonce(&key, &nonce, plaintext)?;

    let mut output = Vec::with_capacity(PUBKEY_SIZE + ciphertext.len());
    output.extend_from_slice(ephemeral_pk.as_bytes());
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Open a [`seal`] output with the recipient's key pair.
pub fn seal_open(data: &[u8], recipient: &Key) -> Result<Vec<u8>, CryptoError> {
    if data.len() < PUBKEY_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (ephemeral_bytes, ciphertext) = data.split_at(PUBKEY_SIZE);
    let mut ephemeral = [0u8; PUBKEY_SIZE];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral = PublicKey::from(ephemeral);

    let shared = agree(recipient.secret(), &ephemeral).ok_or(CryptoError::DecryptionFailed)?;
    let (key, nonce) = seal_key_and_nonce(&shared, &ephemeral, recipient.public_key());
    decrypt_with_nonce(&key, &nonce, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [9u8; 32];
        let plaintext = b"the walls have ears";

        let encrypted = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_box_roundtrip() {
        let alice = Key::generate();
        let bob = Key::generate();

        let boxed = box_seal(b"hello", bob.public_key(), alice.secret()).unwrap();
        let opened = box_open(&boxed, alice.public_key(), bob.secret()).unwrap();
        assert_eq!(opened, b"hello");
    }

    #[test]
    fn test_box_wrong_sender_fails() {
        let alice = Key::generate();
        let bob = Key::generate();
        let mallory = Key::generate();

        let boxed = box_seal(b"hello", bob.public_key(), alice.secret()).unwrap();
        assert_eq!(
            box_open(&boxed, mallory.public_key(), bob.secret()),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_seal_roundtrip() {
        let bob = Key::generate();
        let sealed = seal(b"anonymous", bob.public_key()).unwrap();
        assert_eq!(seal_open(&sealed, &bob).unwrap(), b"anonymous");
    }

    #[test]
    fn test_seal_is_randomized() {
        let bob = Key::generate();
        let a = seal(b"same", bob.public_key()).unwrap();
        let b = seal(b"same", bob.public_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_seal_wrong_recipient_fails() {
        let bob = Key::generate();
        let eve = Key::generate();
        let sealed = seal(b"not for eve", bob.public_key()).unwrap();
        assert!(seal_open(&sealed, &eve).is_err());
    }

    #[test]
    fn test_seal_truncated_fails() {
        let bob = Key::generate();
        assert!(seal_open(&[0u8; 40], &bob).is_err());
        assert!(seal_open(&[], &bob).is_err());
    }

    #[test]
    fn test_low_order_recipient_rejected() {
        let alice = Key::generate();
        let zero = PublicKey::from([0u8; 32]);
        assert_eq!(seal(b"x", &zero), Err(CryptoError::InvalidKey));
        assert_eq!(
            box_seal(b"x", &zero, alice.secret()),
            Err(CryptoError::InvalidKey)
        );
    }
}
