//! The cache store: single owner of every cached value.
//!
//! All reads hand out owned copies; all mutation goes through `set`,
//! `commit_fetch`, `remove`, `invalidate` and `clear`, each of which publishes
//! a [`CacheEvent`] after the in-memory commit. When a disk mirror is
//! attached, the matching [`MirrorOp`] is queued under the same write lock so
//! the files on disk replay the in-memory history in order.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::disk::{DiskMirror, MirrorOp, MirrorWriter, PersistedEntry};
use super::events::{CacheEvent, CacheSubscription, EVENT_BUS_CAPACITY};
use super::{CacheEntry, CacheKey};
use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// How concurrent fetches for the same key are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOrdering {
    /// Whichever fetch completes last wins, even if it was issued first.
    #[default]
    LastCompletion,
    /// A completion is discarded if a fetch issued after it already
    /// committed, or if the key was invalidated after it was issued.
    IssueOrder,
}

/// Issued when a fetch for a key starts; presented again to commit its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: CacheKey,
    seq: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

#[derive(Debug, Default)]
struct TicketState {
    issued: u64,
    committed: u64,
}

#[derive(Default)]
struct Slots {
    entries: HashMap<CacheKey, CacheEntry<Value>>,
    tickets: HashMap<CacheKey, TicketState>,
}

pub struct CacheStore {
    slots: RwLock<Slots>,
    events: broadcast::Sender<CacheEvent>,
    mirror: Option<MirrorWriter>,
    ordering: FetchOrdering,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    /// In-memory store with completion-order writes.
    pub fn new() -> Self {
        Self::with_ordering(FetchOrdering::default())
    }

    pub fn with_ordering(ordering: FetchOrdering) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            slots: RwLock::new(Slots::default()),
            events,
            mirror: None,
            ordering,
        }
    }

    /// Store mirrored to JSON files under `cache_dir`, warmed from whatever
    /// is already there.
    pub fn open(cache_dir: PathBuf, ordering: FetchOrdering) -> Result<Self> {
        let disk = DiskMirror::new(cache_dir)?;
        let mut store = Self::with_ordering(ordering);

        {
            let slots = store.slots.get_mut().unwrap_or_else(|p| p.into_inner());
            for persisted in disk.load_all()? {
                slots.entries.insert(
                    persisted.key,
                    CacheEntry {
                        value: persisted.data,
                        last_updated_at: persisted.cached_at,
                    },
                );
            }
        }

        store.mirror = Some(MirrorWriter::spawn(disk)?);
        Ok(store)
    }

    /// Wait for queued mirror writes to land. Returns at once without a mirror.
    pub async fn flush(&self) {
        if let Some(ref mirror) = self.mirror {
            mirror.flush().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn hold_mirror(&self) -> std::sync::mpsc::Sender<()> {
        let (release, held) = std::sync::mpsc::channel();
        self.mirror_send(|| MirrorOp::Hold(held));
        release
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Typed copy of the entry. A value that does not decode as `T` is a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let raw = self.get_raw(key)?;
        match raw.decode() {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value has unexpected shape, treating as miss");
                None
            }
        }
    }

    pub fn get_raw(&self, key: &CacheKey) -> Option<CacheEntry<Value>> {
        rw_read(&self.slots, SOURCE, "get_raw").entries.get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        rw_read(&self.slots, SOURCE, "contains").entries.contains_key(key)
    }

    /// All keys currently held, sorted.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = rw_read(&self.slots, SOURCE, "keys")
            .entries
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        rw_read(&self.slots, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable age of every entry, for status displays.
    pub fn ages(&self) -> Vec<(CacheKey, String)> {
        let slots = rw_read(&self.slots, SOURCE, "ages");
        let mut ages: Vec<(CacheKey, String)> = slots
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.age_display()))
            .collect();
        ages.sort_by(|a, b| a.0.cmp(&b.0));
        ages
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn set<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value);
        Ok(())
    }

    pub fn set_value(&self, key: &CacheKey, value: Value) {
        let entry = CacheEntry::new(value);
        {
            let mut slots = rw_write(&self.slots, SOURCE, "set");
            self.mirror_send(|| MirrorOp::Save(persisted(key, &entry)));
            slots.entries.insert(key.clone(), entry);
        }

        self.publish(CacheEvent::Updated { key: key.clone() });
    }

    /// Stamp a fetch that is about to start.
    pub fn begin_fetch(&self, key: &CacheKey) -> FetchTicket {
        let mut slots = rw_write(&self.slots, SOURCE, "begin_fetch");
        let state = slots.tickets.entry(key.clone()).or_default();
        state.issued += 1;
        FetchTicket {
            key: key.clone(),
            seq: state.issued,
        }
    }

    /// Commit a fetched value. Returns `false` when the ordering policy
    /// discarded it as superseded.
    pub fn commit_fetch<T: Serialize + ?Sized>(
        &self,
        ticket: &FetchTicket,
        value: &T,
    ) -> Result<bool, serde_json::Error> {
        let entry = CacheEntry::new(serde_json::to_value(value)?);

        {
            let mut guard = rw_write(&self.slots, SOURCE, "commit_fetch");
            let slots = &mut *guard;
            let state = slots.tickets.entry(ticket.key.clone()).or_default();

            if self.ordering == FetchOrdering::IssueOrder && ticket.seq <= state.committed {
                debug!(
                    key = %ticket.key,
                    ticket = ticket.seq,
                    committed = state.committed,
                    "Discarding superseded fetch result"
                );
                return Ok(false);
            }

            state.committed = state.committed.max(ticket.seq);
            self.mirror_send(|| MirrorOp::Save(persisted(&ticket.key, &entry)));
            slots.entries.insert(ticket.key.clone(), entry);
        }

        self.publish(CacheEvent::Updated {
            key: ticket.key.clone(),
        });
        Ok(true)
    }

    /// Drop a key for a local reason. Returns whether it was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut slots = rw_write(&self.slots, SOURCE, "remove");
            let removed = slots.entries.remove(key).is_some();
            if removed {
                self.mirror_send(|| MirrorOp::Remove(key.clone()));
            }
            removed
        };

        if removed {
            self.publish(CacheEvent::Removed { key: key.clone() });
        }
        removed
    }

    /// Evict keys made stale by a mutation. Fetches issued before this call
    /// can no longer commit under [`FetchOrdering::IssueOrder`].
    pub fn invalidate(&self, keys: &[CacheKey]) {
        {
            let mut guard = rw_write(&self.slots, SOURCE, "invalidate");
            let slots = &mut *guard;
            for key in keys {
                slots.entries.remove(key);
                let state = slots.tickets.entry(key.clone()).or_default();
                state.committed = state.issued;
                self.mirror_send(|| MirrorOp::Remove(key.clone()));
            }
        }

        for key in keys {
            debug!(key = %key, "Invalidated cache key");
            self.publish(CacheEvent::Invalidated { key: key.clone() });
        }
    }

    /// Drop everything (logout).
    pub fn clear(&self) {
        {
            let mut guard = rw_write(&self.slots, SOURCE, "clear");
            let slots = &mut *guard;
            slots.entries.clear();
            for state in slots.tickets.values_mut() {
                state.committed = state.issued;
            }
            self.mirror_send(|| MirrorOp::Clear);
        }

        self.publish(CacheEvent::Cleared);
    }

    // ========================================================================
    // Change notifications
    // ========================================================================

    /// Every event the store publishes.
    pub fn subscribe(&self) -> CacheSubscription {
        CacheSubscription::new(self.events.subscribe(), None)
    }

    /// Only events for the given keys (plus `Cleared`).
    pub fn subscribe_keys(&self, keys: impl IntoIterator<Item = CacheKey>) -> CacheSubscription {
        let keys: HashSet<CacheKey> = keys.into_iter().collect();
        CacheSubscription::new(self.events.subscribe(), Some(keys))
    }

    fn publish(&self, event: CacheEvent) {
        // No receivers is normal when nothing is observing the cache
        let _ = self.events.send(event);
    }

    /// Call only while holding the slots write lock.
    fn mirror_send(&self, op: impl FnOnce() -> MirrorOp) {
        if let Some(ref mirror) = self.mirror {
            mirror.send(op());
        }
    }
}

fn persisted(key: &CacheKey, entry: &CacheEntry<Value>) -> PersistedEntry {
    PersistedEntry {
        key: key.clone(),
        data: entry.value.clone(),
        cached_at: entry.last_updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    #[test]
    fn test_get_returns_independent_copy() {
        let store = CacheStore::new();
        store.set(&key("k"), &vec![1, 2, 3]).unwrap();

        let mut copy: CacheEntry<Vec<i32>> = store.get(&key("k")).expect("hit");
        copy.value.push(4);

        let again: CacheEntry<Vec<i32>> = store.get(&key("k")).expect("hit");
        assert_eq!(again.value, vec![1, 2, 3]);
    }

    #[test]
    fn test_shape_mismatch_is_a_miss() {
        let store = CacheStore::new();
        store.set(&key("k"), "not a list").unwrap();
        assert!(store.get::<Vec<i32>>(&key("k")).is_none());
        assert!(store.contains(&key("k")));
    }

    #[test]
    fn test_set_publishes_update() {
        let store = CacheStore::new();
        let mut sub = store.subscribe_keys([key("a")]);

        store.set(&key("b"), &1).unwrap();
        store.set(&key("a"), &2).unwrap();

        assert_eq!(sub.try_recv(), Some(CacheEvent::Updated { key: key("a") }));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_invalidate_evicts_and_publishes() {
        let store = CacheStore::new();
        store.set(&key("a"), &1).unwrap();
        let mut sub = store.subscribe();

        store.invalidate(&[key("a"), key("missing")]);

        assert!(!store.contains(&key("a")));
        assert_eq!(sub.try_recv(), Some(CacheEvent::Invalidated { key: key("a") }));
        assert_eq!(
            sub.try_recv(),
            Some(CacheEvent::Invalidated { key: key("missing") })
        );
    }

    #[test]
    fn test_remove_only_publishes_when_present() {
        let store = CacheStore::new();
        let mut sub = store.subscribe();
        assert!(!store.remove(&key("a")));
        assert_eq!(sub.try_recv(), None);

        store.set(&key("a"), &1).unwrap();
        assert!(store.remove(&key("a")));
        assert_eq!(sub.try_recv(), Some(CacheEvent::Updated { key: key("a") }));
        assert_eq!(sub.try_recv(), Some(CacheEvent::Removed { key: key("a") }));
    }

    #[test]
    fn test_last_completion_lets_slow_fetch_win() {
        let store = CacheStore::new();
        let slow = store.begin_fetch(&key("k"));
        let fast = store.begin_fetch(&key("k"));

        assert!(store.commit_fetch(&fast, &"new").unwrap());
        assert!(store.commit_fetch(&slow, &"old").unwrap());

        let entry: CacheEntry<String> = store.get(&key("k")).unwrap();
        assert_eq!(entry.value, "old");
    }

    #[test]
    fn test_issue_order_discards_superseded_fetch() {
        let store = CacheStore::with_ordering(FetchOrdering::IssueOrder);
        let slow = store.begin_fetch(&key("k"));
        let fast = store.begin_fetch(&key("k"));

        assert!(store.commit_fetch(&fast, &"new").unwrap());
        assert!(!store.commit_fetch(&slow, &"old").unwrap());

        let entry: CacheEntry<String> = store.get(&key("k")).unwrap();
        assert_eq!(entry.value, "new");
    }

    #[test]
    fn test_issue_order_discards_fetch_started_before_invalidation() {
        let store = CacheStore::with_ordering(FetchOrdering::IssueOrder);
        let before = store.begin_fetch(&key("k"));
        store.invalidate(&[key("k")]);

        assert!(!store.commit_fetch(&before, &"stale").unwrap());
        assert!(!store.contains(&key("k")));

        let after = store.begin_fetch(&key("k"));
        assert!(store.commit_fetch(&after, &"fresh").unwrap());
        assert!(store.contains(&key("k")));
    }

    #[test]
    fn test_clear_publishes_cleared() {
        let store = CacheStore::new();
        store.set(&key("a"), &1).unwrap();
        let mut sub = store.subscribe_keys([key("unrelated")]);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(sub.try_recv(), Some(CacheEvent::Cleared));
    }

    #[test]
    fn test_open_warms_from_disk_mirror() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = CacheStore::open(dir.path().to_path_buf(), FetchOrdering::default()).unwrap();
            store.set(&key("friends:1"), &vec!["amy", "bo"]).unwrap();
            store.set(&key("friends:2"), &vec!["cy"]).unwrap();
            store.invalidate(&[key("friends:2")]);
        }

        let reopened = CacheStore::open(dir.path().to_path_buf(), FetchOrdering::default()).unwrap();
        assert_eq!(reopened.keys(), vec![key("friends:1")]);
        let entry: CacheEntry<Vec<String>> = reopened.get(&key("friends:1")).unwrap();
        assert_eq!(entry.value, vec!["amy", "bo"]);

        reopened.clear();
        drop(reopened);
        let empty = CacheStore::open(dir.path().to_path_buf(), FetchOrdering::default()).unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_writes_return_before_mirror_io() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CacheStore::open(dir.path().to_path_buf(), FetchOrdering::default()).unwrap();
        let file_count = || std::fs::read_dir(dir.path()).unwrap().count();

        let release = store.hold_mirror();
        store.set(&key("friends:1"), &vec!["amy"]).unwrap();
        store.invalidate(&[key("friends:2")]);
        assert!(store.contains(&key("friends:1")));
        assert_eq!(file_count(), 0);

        release.send(()).unwrap();
        store.flush().await;
        assert_eq!(file_count(), 1);
    }

    #[test]
    fn test_mirror_matches_memory_when_set_races_invalidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys: Vec<CacheKey> = (0..500).map(|i| key(&format!("friends:{i}"))).collect();

        let in_memory: Vec<bool> = {
            let store = CacheStore::open(dir.path().to_path_buf(), FetchOrdering::default()).unwrap();
            std::thread::scope(|s| {
                s.spawn(|| {
                    for k in &keys {
                        store.set(k, &vec!["amy"]).unwrap();
                    }
                });
                s.spawn(|| {
                    for k in &keys {
                        store.invalidate(std::slice::from_ref(k));
                    }
                });
            });
            keys.iter().map(|k| store.contains(k)).collect()
        };

        let reopened = CacheStore::open(dir.path().to_path_buf(), FetchOrdering::default()).unwrap();
        for (k, expected) in keys.iter().zip(in_memory) {
            assert_eq!(reopened.contains(k), expected, "disk diverged from memory for {k}");
        }
    }
}
