//! # hush-store
//!
//! Local replica of the channels this client participates in, backed by
//! SQLite (SQLCipher with the `sqlcipher` feature).
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection`. Reads are methods on `Database`; writes that must
//! land together take a `&Transaction` and are composed inside
//! [`Database::transact`].

pub mod channels;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod outbox;
pub mod state;
pub mod users;

mod columns;
mod error;

pub use channels::{delete_channel, insert_channel_if_absent, save_channel};
pub use database::Database;
pub use error::{Result, StoreError};
pub use messages::{merge_remote_message, upsert_message};
pub use models::*;
pub use outbox::{clear_sync_pending, enqueue_outgoing, mark_sync_pending, set_sync_position};
pub use rusqlite::Transaction;
pub use state::{load_channel_state, save_channel_state, save_channel_status, ChannelState};
