//! Authoritative key-value store at the root of the tree
//!
//! The store never crashes and always answers. It is the only place a
//! version is assigned, and after every confirmed write it pushes the new
//! entry to each far cache so the tiers below can refresh.

use crate::cache::CacheStats;
use crate::config::StoreConfig;
use crate::error::{CacheError, Result};
use crate::message::{Command, Control, Inbox, Message, NodeSnapshot, Peer};
use crate::types::{Entry, Key, Liveness, NodeId, NodeKind, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Ground-truth table
#[derive(Debug, Clone, Default)]
pub struct StoreTable {
    entries: HashMap<Key, Entry>,
}

impl StoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys `0..initial_keys` with random values in `[0, value_range)`, all at version 1
    pub fn seeded(config: &StoreConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let entries = (0..config.initial_keys)
            .map(|key| (key, Entry::new(key, rng.gen_range(0..config.value_range), 1)))
            .collect();

        Self { entries }
    }

    pub fn read(&self, key: Key) -> Result<Entry> {
        self.entries
            .get(&key)
            .copied()
            .ok_or(CacheError::KeyNotFound { key })
    }

    /// Overwrite `key`, bumping its version (1 for a new key)
    pub fn write(&mut self, key: Key, value: Value) -> Entry {
        let version = self.entries.get(&key).map_or(1, |entry| entry.version + 1);
        let entry = Entry::new(key, value, version);
        self.entries.insert(key, entry);
        entry
    }

    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        self.entries.values().copied()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Store actor: serves far caches, the near-cache bypass path and the handle
pub struct StoreNode {
    me: Peer,
    inbox: Inbox,
    table: StoreTable,
    far_caches: Vec<Peer>,
    stats: CacheStats,
}

impl StoreNode {
    pub fn new(me: Peer, inbox: Inbox, table: StoreTable, far_caches: Vec<Peer>) -> Self {
        Self {
            me,
            inbox,
            table,
            far_caches,
            stats: CacheStats::default(),
        }
    }

    pub async fn run(mut self) {
        info!(
            "Store started with {} keys and {} far caches",
            self.table.len(),
            self.far_caches.len()
        );

        while let Some(message) = self.inbox.recv().await {
            match message {
                Message::Control(Control::Shutdown) => break,
                message => self.handle(message),
            }
        }

        debug!("Store stopped");
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::ReadRequest {
                key,
                requester,
                request_id,
            } => {
                let reply = match self.read(key) {
                    Ok(entry) => Message::ReadConfirmation { entry, request_id },
                    Err(error) => Message::RequestFailed { request_id, error },
                };
                requester.send(reply);
            }
            Message::WriteRequest {
                key,
                value,
                requester,
                request_id,
            } => {
                let entry = self.write(key, value);
                debug!("Store confirmed {} for {} ({})", entry, requester.id(), request_id);
                requester.send(Message::WriteConfirmation { entry, request_id });
                self.push(entry);
            }
            Message::Command(Command::Read { key, respond }) => {
                let _ = respond.send(self.read(key));
            }
            Message::Command(Command::Write { key, value, respond }) => {
                let entry = self.write(key, value);
                debug!("Store wrote {} through its handle", entry);
                let _ = respond.send(Ok(entry));
                self.push(entry);
            }
            Message::Control(control) => self.on_control(control),
            other => warn!("Store ignoring unexpected {}", other.name()),
        }
    }

    fn read(&mut self, key: Key) -> Result<Entry> {
        let result = self.table.read(key);
        match &result {
            Ok(entry) => {
                self.stats.hits += 1;
                debug!("Store read {}", entry);
            }
            Err(_) => {
                self.stats.misses += 1;
                debug!("Store has no key {}", key);
            }
        }
        result
    }

    fn write(&mut self, key: Key, value: Value) -> Entry {
        self.stats.confirmations += 1;
        self.table.write(key, value)
    }

    fn push(&mut self, entry: Entry) {
        for far_cache in &self.far_caches {
            far_cache.send(Message::UpdatePush(entry));
            self.stats.pushes_sent += 1;
        }
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::Dump(respond) => {
                let _ = respond.send(NodeSnapshot::new(
                    self.me.id().clone(),
                    NodeKind::Store,
                    Liveness::Normal,
                    self.table.entries(),
                    0,
                ));
            }
            Control::Clear => {
                let count = self.table.clear();
                info!("Store cleared {} entries", count);
            }
            Control::Stats(respond) => {
                let _ = respond.send(CacheStats {
                    entries: self.table.len(),
                    ..self.stats.clone()
                });
            }
            Control::Liveness(respond) => {
                let _ = respond.send(Liveness::Normal);
            }
            Control::Crash | Control::Recover => {
                warn!("Store has no crash model, ignoring crash/recover");
            }
            Control::Shutdown => {}
        }
    }
}

/// Async access to the store for operators and tests
#[derive(Debug, Clone)]
pub struct StoreHandle {
    peer: Peer,
}

impl StoreHandle {
    pub fn new(peer: Peer) -> Self {
        Self { peer }
    }

    pub fn id(&self) -> &NodeId {
        self.peer.id()
    }

    pub async fn read(&self, key: Key) -> Result<Entry> {
        self.peer
            .ask(|respond| Message::Command(Command::Read { key, respond }))
            .await?
    }

    /// Write through the store; far caches receive the update as a push
    pub async fn write(&self, key: Key, value: Value) -> Result<Entry> {
        self.peer
            .ask(|respond| Message::Command(Command::Write { key, value, respond }))
            .await?
    }

    pub async fn dump(&self) -> Result<NodeSnapshot> {
        self.peer
            .ask(|respond| Message::Control(Control::Dump(respond)))
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        if self.peer.send(Message::Control(Control::Clear)) {
            Ok(())
        } else {
            Err(CacheError::NodeUnavailable(self.id().clone()))
        }
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.peer
            .ask(|respond| Message::Control(Control::Stats(respond)))
            .await
    }
}
