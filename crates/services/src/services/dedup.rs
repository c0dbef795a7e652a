use std::{
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard},
};

use lru::LruCache;

/// Bounded memory of change events that were already applied.
///
/// Keeps the most recently seen `capacity` keys; older keys are evicted, so a
/// duplicate arriving after that many newer events would be applied again.
/// Re-application is harmless for every consumer because applying an event
/// is idempotent.
#[derive(Debug)]
pub struct DedupSet {
    seen: Mutex<LruCache<String, ()>>,
}

impl DedupSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, ()>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `key`; true when it had not been seen before.
    pub fn first_sighting(&self, key: &str) -> bool {
        self.lock().put(key.to_string(), ()).is_none()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }
}
