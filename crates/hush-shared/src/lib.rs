//! # hush-shared
//!
//! Types shared by every Hush crate: key identities, the sender-box cipher
//! and the chat message model that travels inside it.

pub mod cipher;
pub mod command;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod message;
pub mod types;

pub use cipher::{decrypt_sender_box, SenderBox};
pub use command::{ChannelInfo, ChannelInvite, MessageCommand};
pub use constants::PENDING_REMOTE_INDEX;
pub use error::{CryptoError, MessageError};
pub use keys::{Key, KeyRecord};
pub use message::{decrypt_message, Message};
pub use types::KeyId;
