use hush_shared::{CryptoError, KeyId, MessageError};
use hush_store::StoreError;
use thiserror::Error;

use crate::remote::RemoteError;

/// Errors returned by [`Messenger`](crate::Messenger) operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid outgoing message, undecryptable envelope or forged sender.
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("Event for channel {actual} was delivered on channel {expected}")]
    ChannelMismatch { expected: KeyId, actual: KeyId },

    /// The relay handed back metadata that cannot belong to a real event.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Key not found: {0}")]
    KeyNotFound(KeyId),

    #[error("Messenger is locked")]
    Locked,

    /// The store handle is unusable after a panic while it was borrowed.
    #[error("Store unavailable")]
    StoreUnavailable,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Message(MessageError::Crypto(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
