//! # hush-client
//!
//! Sync engine for end-to-end encrypted channels. A [`Messenger`] keeps a
//! local replica of every channel it belongs to and reconciles it with an
//! untrusted relay through the [`Keyring`] and [`Transport`] interfaces.

pub mod config;
pub mod logging;
pub mod memory;
pub mod messenger;
pub mod remote;

mod error;

pub use config::MessengerConfig;
pub use error::{Error, Result};
pub use memory::{MemoryKeyring, MemoryRelay, MemoryTransport};
pub use messenger::Messenger;
pub use remote::{Event, Keyring, RemoteError, Transport};
