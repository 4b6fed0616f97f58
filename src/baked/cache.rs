//! Plan Cache ("bakery")
//!
//! Maps [`CacheKey`] to a compiled, session-detached [`QueryContext`].
//!
//! ## Design
//!
//! Bounded caches evict the least recently used entry on insert once full;
//! relationship-scoped caches are unbounded because their key space is
//! bounded by code paths rather than parameter values. Cloning a
//! `PlanCache` yields another handle to the same storage.

use super::CacheKey;
use crate::config::CacheConfig;
use crate::query::QueryContext;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache entry for a compiled plan
#[derive(Clone)]
struct CacheEntry<T> {
    value: T,

    /// Logical clock value of the last access
    last_used: u64,
}

impl<T> CacheEntry<T> {
    fn new(value: T, tick: u64) -> Self {
        CacheEntry { value, last_used: tick }
    }

    fn touch(&mut self, tick: u64) {
        self.last_used = tick;
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found a plan
    pub hits: u64,

    /// Lookups that did not
    pub misses: u64,

    /// Entries currently held
    pub size: usize,

    /// Entries dropped to stay within capacity
    pub evictions: u64,

    /// Plans compiled for this cache, nested plans included
    pub compiles: u64,
}

impl CacheStats {
    /// Hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    compiles: AtomicU64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<CacheKey, CacheEntry<Arc<QueryContext>>>,
    tick: u64,
}

impl Entries {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Shared plan cache
#[derive(Clone)]
pub struct PlanCache {
    entries: Arc<RwLock<Entries>>,
    /// `None` = unbounded
    capacity: Option<usize>,
    counters: Arc<Counters>,
}

impl PlanCache {
    /// Bounded cache with least-recently-used eviction
    pub fn lru(capacity: usize) -> Self {
        PlanCache {
            entries: Arc::new(RwLock::new(Entries::default())),
            capacity: Some(capacity.max(1)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn unbounded() -> Self {
        PlanCache {
            entries: Arc::new(RwLock::new(Entries::default())),
            capacity: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Shared bakery sized by `cache.capacity` (0 = unbounded)
    pub fn from_config(config: &CacheConfig) -> Self {
        match config.capacity {
            0 => PlanCache::unbounded(),
            n => PlanCache::lru(n),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Look up a plan, refreshing its recency
    pub fn get(&self, key: &CacheKey) -> Option<Arc<QueryContext>> {
        let mut entries = self.entries.write();
        let tick = entries.next_tick();
        match entries.map.get_mut(key) {
            Some(entry) => {
                entry.touch(tick);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = key.fingerprint(), "plan_cache_hit");
                Some(Arc::clone(&entry.value))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = key.fingerprint(), "plan_cache_miss");
                None
            }
        }
    }

    /// Membership test that neither counts nor refreshes recency
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().map.contains_key(key)
    }

    /// Store a plan, replacing any previous plan for the key
    pub fn insert(&self, key: CacheKey, plan: Arc<QueryContext>) {
        let mut entries = self.entries.write();
        let tick = entries.next_tick();
        if let Some(capacity) = self.capacity {
            while entries.map.len() >= capacity && !entries.map.contains_key(&key) {
                let Some(oldest) = entries
                    .map
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                entries.map.remove(&oldest);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = oldest.fingerprint(), "plan_cache_evicted");
            }
        }
        tracing::debug!(
            cache_key = key.fingerprint(),
            entries = entries.map.len() + 1,
            "plan_cache_store"
        );
        entries.map.insert(key, CacheEntry::new(plan, tick));
    }

    pub(crate) fn record_compile(&self) {
        self.counters.compiles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            size: self.entries.read().map.len(),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            compiles: self.counters.compiles.load(Ordering::Relaxed),
        }
    }

    /// Drop every plan; counters are kept
    pub fn clear(&self) {
        self.entries.write().map.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached keys, least recently used first
    pub fn keys(&self) -> Vec<CacheKey> {
        let entries = self.entries.read();
        let mut keys: Vec<_> = entries
            .map
            .iter()
            .map(|(k, e)| (e.last_used, k.clone()))
            .collect();
        keys.sort();
        keys.into_iter().map(|(_, k)| k).collect()
    }

    /// True when both handles share storage
    pub fn ptr_eq(&self, other: &PlanCache) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        PlanCache::lru(1000)
    }
}

impl fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baked::StepId;
    use crate::fixtures;

    fn key(name: &'static str) -> CacheKey {
        let mut key = CacheKey::new();
        key.push_step(&StepId::new(name), &[]);
        key
    }

    fn plan() -> Arc<QueryContext> {
        let session = fixtures::session();
        Arc::new(session.query("User").unwrap().compile().unwrap().with_session(None))
    }

    #[test]
    fn test_lru_eviction() {
        let cache = PlanCache::lru(2);
        let plan = plan();
        cache.insert(key("a"), Arc::clone(&plan));
        cache.insert(key("b"), Arc::clone(&plan));
        assert!(cache.get(&key("a")).is_some());

        cache.insert(key("c"), Arc::clone(&plan));
        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(cache.keys(), vec![key("a"), key("c")]);
    }

    #[test]
    fn test_replacing_key_does_not_evict() {
        let cache = PlanCache::lru(1);
        let plan = plan();
        cache.insert(key("a"), Arc::clone(&plan));
        cache.insert(key("a"), Arc::clone(&plan));
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unbounded_and_shared_handles() {
        let cache = PlanCache::unbounded();
        let handle = cache.clone();
        let plan = plan();
        for name in ["a", "b", "c", "d"] {
            handle.insert(key(name), Arc::clone(&plan));
        }
        assert_eq!(cache.len(), 4);
        assert!(cache.ptr_eq(&handle));
        assert!(!cache.ptr_eq(&PlanCache::unbounded()));
        assert!(cache.get(&key("missing")).is_none());
        assert_eq!(cache.stats().misses, 1);
        assert!((cache.stats().hit_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_config() {
        let mut config = CacheConfig::default();
        assert_eq!(PlanCache::from_config(&config).capacity(), Some(1000));
        config.capacity = 0;
        assert_eq!(PlanCache::from_config(&config).capacity(), None);
    }
}
