//! Change notifications published by the cache store.

use std::collections::HashSet;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use super::CacheKey;

/// Capacity of the change bus. Slow subscribers past this many events lag
/// and skip ahead rather than blocking publishers.
pub const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A new value was committed for the key
    Updated { key: CacheKey },
    /// The key was removed by a local-only decision (sweeper, explicit remove)
    Removed { key: CacheKey },
    /// The key was evicted because a mutation made it stale
    Invalidated { key: CacheKey },
    /// Every key was dropped (logout)
    Cleared,
}

impl CacheEvent {
    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            CacheEvent::Updated { key }
            | CacheEvent::Removed { key }
            | CacheEvent::Invalidated { key } => Some(key),
            CacheEvent::Cleared => None,
        }
    }
}

/// A receiver filtered to the keys a consumer cares about.
pub struct CacheSubscription {
    rx: broadcast::Receiver<CacheEvent>,
    keys: Option<HashSet<CacheKey>>,
}

impl CacheSubscription {
    pub(crate) fn new(rx: broadcast::Receiver<CacheEvent>, keys: Option<HashSet<CacheKey>>) -> Self {
        Self { rx, keys }
    }

    fn wants(&self, event: &CacheEvent) -> bool {
        match (&self.keys, event.key()) {
            (None, _) | (_, None) => true,
            (Some(keys), Some(key)) => keys.contains(key),
        }
    }

    /// Wait for the next relevant event. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache subscriber lagged, skipping events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next relevant event already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache subscriber lagged, skipping events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_filters_by_key() {
        let (tx, rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        let wanted = CacheKey::new("friends:1");
        let mut sub = CacheSubscription::new(rx, Some(HashSet::from([wanted.clone()])));

        tx.send(CacheEvent::Updated {
            key: CacheKey::new("friends:2"),
        })
        .unwrap();
        tx.send(CacheEvent::Updated { key: wanted.clone() }).unwrap();
        tx.send(CacheEvent::Cleared).unwrap();

        assert_eq!(sub.try_recv(), Some(CacheEvent::Updated { key: wanted }));
        assert_eq!(sub.try_recv(), Some(CacheEvent::Cleared));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_recv_ends_when_sender_dropped() {
        let (tx, rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        let mut sub = CacheSubscription::new(rx, None);
        drop(tx);
        assert_eq!(sub.recv().await, None);
    }
}
