//! In-process relay with keyring and transport views over it.
//!
//! Holds per-channel event logs and one remote keyring per account. Several
//! [`MemoryKeyring`]s may share an account to model multiple devices. The
//! relay can be switched offline, and raw events can be injected to exercise
//! the sync engine's verification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use hush_shared::types::now_millis;
use hush_shared::{Key, KeyId, KeyRecord};

use crate::remote::{Event, Keyring, RemoteError, Transport};

#[derive(Default)]
struct RelayState {
    logs: HashMap<KeyId, Vec<Event>>,
    tokens: HashMap<KeyId, String>,
    accounts: HashMap<String, HashMap<KeyId, KeyRecord>>,
    offline: bool,
    replay_all: bool,
    last_timestamp: i64,
}

impl RelayState {
    fn append(&mut self, channel: &KeyId, data: Vec<u8>) -> (i64, i64) {
        let timestamp = now_millis().max(self.last_timestamp + 1);
        self.last_timestamp = timestamp;

        let log = self.logs.entry(*channel).or_default();
        let index = log.len() as i64 + 1;
        log.push(Event {
            data,
            index,
            timestamp,
        });
        (index, timestamp)
    }

    fn head(&self, channel: &KeyId) -> i64 {
        self.logs
            .get(channel)
            .and_then(|log| log.last())
            .map(|e| e.index)
            .unwrap_or(0)
    }
}

/// Shared handle to the relay. Clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// While offline every remote call fails.
    pub fn set_offline(&self, offline: bool) {
        tracing::debug!(offline, "relay connectivity changed");
        self.state().offline = offline;
    }

    /// Serve the whole log on every fetch, ignoring `since`.
    pub fn set_replay_all(&self, replay_all: bool) {
        self.state().replay_all = replay_all;
    }

    /// Append bytes to a channel log without any checks.
    pub fn push_raw(&self, channel: &KeyId, data: Vec<u8>) -> (i64, i64) {
        self.state().append(channel, data)
    }

    pub fn events(&self, channel: &KeyId) -> Vec<Event> {
        self.state().logs.get(channel).cloned().unwrap_or_default()
    }

    /// A keyring view for one device of `account`.
    pub fn keyring(&self, account: &str) -> MemoryKeyring {
        MemoryKeyring {
            relay: self.clone(),
            account: account.to_string(),
            local: Mutex::new(LocalKeyring::default()),
        }
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            relay: self.clone(),
        }
    }
}

enum Pending {
    Set(KeyRecord),
    Remove(KeyId),
}

#[derive(Default)]
struct LocalKeyring {
    records: HashMap<KeyId, KeyRecord>,
    pending: Vec<Pending>,
    // last log head reported by `changes`
    seen: HashMap<KeyId, i64>,
}

pub struct MemoryKeyring {
    relay: MemoryRelay,
    account: String,
    local: Mutex<LocalKeyring>,
}

impl MemoryKeyring {
    fn local(&self) -> MutexGuard<'_, LocalKeyring> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn offline() -> RemoteError {
    RemoteError::Keyring("relay offline".into())
}

#[async_trait]
impl Keyring for MemoryKeyring {
    async fn register_channel(&self, channel: &Key) -> Result<KeyRecord, RemoteError> {
        let mut local = self.local();
        let mut relay = self.relay.state();
        if relay.offline {
            return Err(offline());
        }

        let id = channel.id();
        let token = relay
            .tokens
            .entry(id)
            .or_insert_with(|| hex::encode(rand::random::<[u8; 16]>()))
            .clone();
        relay.logs.entry(id).or_default();

        let record = KeyRecord::from(channel).with_token(token);
        relay
            .accounts
            .entry(self.account.clone())
            .or_default()
            .insert(id, record.clone());
        local.records.insert(id, record.clone());

        tracing::debug!(account = %self.account, channel = %id.short(), "registered channel");
        Ok(record)
    }

    fn key(&self, id: &KeyId) -> Result<Option<KeyRecord>, RemoteError> {
        Ok(self.local().records.get(id).cloned())
    }

    fn set(&self, record: KeyRecord) -> Result<(), RemoteError> {
        let mut local = self.local();
        local.records.insert(record.id, record.clone());
        local.pending.push(Pending::Set(record));
        Ok(())
    }

    fn remove(&self, id: &KeyId) -> Result<(), RemoteError> {
        let mut local = self.local();
        local.records.remove(id);
        local.pending.push(Pending::Remove(*id));
        Ok(())
    }

    async fn sync(&self) -> Result<(), RemoteError> {
        let mut local = self.local();
        let mut relay = self.relay.state();
        if relay.offline {
            return Err(offline());
        }

        // Channel records must carry the token the relay issued.
        for op in &local.pending {
            if let Pending::Set(record) = op {
                if let Some(token) = relay.tokens.get(&record.id) {
                    if record.token.as_ref() != Some(token) {
                        return Err(RemoteError::Keyring(format!(
                            "invalid membership token for {}",
                            record.id.short()
                        )));
                    }
                }
            }
        }

        let pushed = local.pending.len();
        let account = relay.accounts.entry(self.account.clone()).or_default();
        for op in local.pending.drain(..) {
            match op {
                Pending::Set(record) => {
                    account.insert(record.id, record);
                }
                Pending::Remove(id) => {
                    account.remove(&id);
                }
            }
        }
        local.records = account.clone();

        tracing::debug!(
            account = %self.account,
            pushed,
            keys = local.records.len(),
            "keyring synced"
        );
        Ok(())
    }

    async fn changes(&self) -> Result<Vec<KeyId>, RemoteError> {
        let mut local = self.local();
        let relay = self.relay.state();
        if relay.offline {
            return Err(offline());
        }

        let mut changed = Vec::new();
        let channels: Vec<KeyId> = local
            .records
            .values()
            .filter(|r| r.secret.is_some() && relay.logs.contains_key(&r.id))
            .map(|r| r.id)
            .collect();
        for id in channels {
            let head = relay.head(&id);
            let seen = local.seen.entry(id).or_insert(0);
            if head > *seen {
                *seen = head;
                changed.push(id);
            }
        }
        changed.sort();
        Ok(changed)
    }
}

pub struct MemoryTransport {
    relay: MemoryRelay,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch_events(&self, channel: &KeyId, since: i64) -> Result<Vec<Event>, RemoteError> {
        let relay = self.relay.state();
        if relay.offline {
            return Err(RemoteError::Transport("relay offline".into()));
        }

        let log = relay.logs.get(channel).ok_or_else(|| {
            RemoteError::Transport(format!("unknown channel {}", channel.short()))
        })?;
        let events = log
            .iter()
            .filter(|e| relay.replay_all || e.index > since)
            .cloned()
            .collect();
        Ok(events)
    }

    async fn append_event(
        &self,
        channel: &KeyId,
        envelope: Vec<u8>,
    ) -> Result<(i64, i64), RemoteError> {
        let mut relay = self.relay.state();
        if relay.offline {
            return Err(RemoteError::Transport("relay offline".into()));
        }
        if !relay.logs.contains_key(channel) {
            return Err(RemoteError::Transport(format!(
                "unknown channel {}",
                channel.short()
            )));
        }
        Ok(relay.append(channel, envelope))
    }
}
