//! At-most-one-in-flight tracking for background refreshes.
//!
//! Unlike request coalescing, a second refresh for a key that is already in
//! flight is not parked behind the first: it is dropped. The running refresh
//! will commit to the store and subscribers observe that commit.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::CacheKey;
use crate::lock::mutex_lock;

const SOURCE: &str = "cache::inflight";

#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<CacheKey>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the key. Returns `None` if a refresh for it is already running.
    pub fn try_begin(&self, key: &CacheKey) -> Option<InFlightGuard> {
        let mut keys = mutex_lock(&self.keys, SOURCE, "try_begin");
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            key: key.clone(),
            owner: self.clone(),
        })
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.keys, SOURCE, "is_in_flight").contains(key)
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.keys, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the key when dropped, whether the refresh succeeded, failed or
/// was cancelled.
#[derive(Debug)]
pub struct InFlightGuard {
    key: CacheKey,
    owner: InFlight,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        mutex_lock(&self.owner.keys, SOURCE, "release").remove(&self.key);
    }
}
