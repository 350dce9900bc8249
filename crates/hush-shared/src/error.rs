use thiserror::Error;

use crate::types::KeyId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Invalid key")]
    InvalidKey,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Invalid message: {0}")]
    Invalid(String),

    #[error("Message sender mismatch: claimed {claimed}, encrypted by {actual}")]
    SenderMismatch { claimed: KeyId, actual: KeyId },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl From<bincode::Error> for MessageError {
    fn from(e: bincode::Error) -> Self {
        MessageError::Encoding(e.to_string())
    }
}
