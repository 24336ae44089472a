//! Bounded query-result cache
//!
//! Entries are evicted least-recently-used once `capacity` is reached and
//! expire `ttl` after insertion. A cache hit never touches the store.
//! `InFlight` serialises misses on the same key so overlapping identical
//! queries share one lookup.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::OwnedMutexGuard;

use crate::config::CacheConfig;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct QueryCache<V: Clone> {
    entries: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> QueryCache<V> {
    /// A zero capacity is treated as one
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl())
    }

    /// Entries stay usable after a panic elsewhere; each operation leaves the LRU consistent
    fn entries(&self) -> MutexGuard<'_, LruCache<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries();

        let expired = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    pub fn insert(&self, key: String, value: V) {
        self.entries().put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Per-key locks for lookups that are currently running
#[derive(Default)]
pub struct InFlight {
    locks: Mutex<HashMap<String, KeyLock>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder is working on `key`
    ///
    /// Callers re-check the cache after this returns; the previous holder may have filled it.
    pub async fn acquire(&self, key: &str) -> InFlightSlot<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let mut slot = InFlightSlot {
            locks: &self.locks,
            key: key.to_string(),
            lock,
            guard: None,
        };
        slot.guard = Some(Arc::clone(&slot.lock).lock_owned().await);
        slot
    }

    /// Keys with a holder or waiters
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held while one lookup runs; the key is forgotten once nobody waits on it
pub struct InFlightSlot<'a> {
    locks: &'a Mutex<HashMap<String, KeyLock>>,
    key: String,
    lock: KeyLock,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this slot are the only owners when nobody is queued
        let idle = locks
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.lock) && Arc::strong_count(current) == 2);
        if idle {
            locks.remove(&self.key);
        }
    }
}

/// Cache key for a query: whitespace collapsed plus the knobs that shape the result
///
/// Case is kept; capitalisation decides which words are entity candidates.
pub fn normalize_key(query: &str, top_k: usize, min_score: u8) -> String {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{}|{}|{}", normalized, top_k, min_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_insert() {
        let cache = QueryCache::new(4, Duration::from_secs(60));
        assert!(cache.get("a").is_none());

        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = QueryCache::new(2, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        assert_eq!(cache.get("a"), Some(1));

        cache.insert("c".to_string(), 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = QueryCache::new(4, Duration::ZERO);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_still_caches_one() {
        let cache = QueryCache::new(0, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_clear() {
        let cache = QueryCache::new(4, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_poisoned_lock_keeps_caching() {
        let cache = std::sync::Arc::new(QueryCache::new(4, Duration::from_secs(60)));
        cache.insert("a".to_string(), 1);

        let poisoner = std::sync::Arc::clone(&cache);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().unwrap();
            panic!("poison the cache lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(cache.entries.is_poisoned());

        assert_eq!(cache.get("a"), Some(1));
        cache.insert("b".to_string(), 2);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_serialises_same_key() {
        let in_flight = Arc::new(InFlight::new());

        let first = in_flight.acquire("q").await;
        let waiter = {
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                let _slot = in_flight.acquire("q").await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // Other keys are not blocked
        drop(in_flight.acquire("other").await);

        drop(first);
        waiter.await.unwrap();
        assert!(in_flight.is_empty());
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(
            normalize_key("  What is   Mama's phone ", 5, 40),
            normalize_key("What is Mama's phone", 5, 40)
        );
        assert_ne!(
            normalize_key("tell me about keystone", 5, 40),
            normalize_key("Tell me about Keystone", 5, 40)
        );
        assert_ne!(normalize_key("q", 5, 40), normalize_key("q", 3, 40));
        assert_ne!(normalize_key("q", 5, 40), normalize_key("q", 5, 60));
    }
}
