use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::ResourceKey;

/// What a mutation serializes on: a lecture record, or one resource calendar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Lecture(Ulid),
    Resource(ResourceKey),
}

impl From<ResourceKey> for LockKey {
    fn from(key: ResourceKey) -> Self {
        LockKey::Resource(key)
    }
}

/// Held lock set. Dropping it releases every lock.
pub struct LockSet {
    keys: Vec<LockKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    pub fn covers(&self, key: &LockKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    pub fn covers_all<'a>(&self, keys: impl IntoIterator<Item = &'a LockKey>) -> bool {
        keys.into_iter().all(|k| self.covers(k))
    }
}

/// One async mutex per lecture/resource, created on first use.
///
/// Every caller acquires its whole lock set in sorted `LockKey` order, so two
/// mutations with overlapping sets can never wait on each other in a cycle.
#[derive(Default)]
pub struct ResourceLocks {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, mut keys: Vec<LockKey>) -> LockSet {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let lock = self.locks.entry(key.clone()).or_default().value().clone();
            guards.push(lock.lock_owned().await);
        }
        LockSet {
            keys,
            _guards: guards,
        }
    }

    /// Drop mutexes nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
