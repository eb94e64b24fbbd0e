// ── Keyed record store shared by the registries ──
//
// Records live under one primary key and answer to any number of
// aliases. Readers get whole-set snapshots through a `watch` channel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::stream::Snapshot;

struct Slot<T> {
    record: Arc<T>,
    aliases: Vec<String>,
}

pub(crate) struct Collection<T: Send + Sync + 'static> {
    slots: DashMap<String, Slot<T>>,
    /// alias -> primary key
    aliases: DashMap<String, String>,
    published: watch::Sender<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> Collection<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
            aliases: DashMap::new(),
            published: watch::Sender::new(Arc::new(Vec::new())),
        }
    }

    /// Store `record` under `key`, replacing its alias set. `true` when
    /// the key was not present before.
    pub(crate) fn upsert(&self, key: String, aliases: Vec<String>, record: Arc<T>) -> bool {
        for alias in &aliases {
            self.aliases.insert(alias.clone(), key.clone());
        }
        let previous = self.slots.insert(key, Slot { record, aliases });

        let is_new = match previous {
            Some(old) => {
                self.forget_aliases(old.aliases.iter().filter(|a| !self.is_claimed(a)));
                false
            }
            None => true,
        };
        self.publish();
        is_new
    }

    pub(crate) fn remove(&self, key: &str) -> Option<Arc<T>> {
        let (_, slot) = self.slots.remove(key)?;
        self.forget_aliases(slot.aliases.iter().filter(|a| !self.is_claimed(a)));
        self.publish();
        Some(slot.record)
    }

    pub(crate) fn get_by_key(&self, key: &str) -> Option<Arc<T>> {
        self.slots.get(key).map(|slot| Arc::clone(&slot.record))
    }

    pub(crate) fn get_by_alias(&self, alias: &str) -> Option<Arc<T>> {
        self.key_for_alias(alias).and_then(|key| self.get_by_key(&key))
    }

    pub(crate) fn key_for_alias(&self, alias: &str) -> Option<String> {
        self.aliases.get(alias).map(|key| key.value().clone())
    }

    pub(crate) fn snapshot(&self) -> Snapshot<T> {
        Arc::clone(&self.published.borrow())
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.published.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// An alias still belongs to a record when its target key carries it.
    fn is_claimed(&self, alias: &str) -> bool {
        self.key_for_alias(alias).is_some_and(|key| {
            self.slots
                .get(&key)
                .is_some_and(|slot| slot.aliases.iter().any(|a| a == alias))
        })
    }

    fn forget_aliases<'a>(&self, aliases: impl Iterator<Item = &'a String>) {
        let stale: Vec<&String> = aliases.collect();
        for alias in stale {
            self.aliases.remove(alias);
        }
    }

    fn publish(&self) {
        let records = self
            .slots
            .iter()
            .map(|slot| Arc::clone(&slot.record))
            .collect::<Vec<_>>();
        // send_replace stores the value even with no receivers.
        self.published.send_replace(Arc::new(records));
    }
}
