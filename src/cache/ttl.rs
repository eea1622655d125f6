//! In-memory keyed cache with per-entry expiry
//!
//! Entries are immutable snapshots: a refresh replaces the entry wholesale.
//! Expiry is checked lazily on read; expired entries stay in the map (and can
//! still be read through [`TtlCache::peek`]) until they are replaced, evicted
//! or purged.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::clock::{system_clock, Clock};

/// A stored value and the instant it was stored
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Result of peeking at the cache, including freshness metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<V> {
    /// The cached value
    pub value: V,
    /// When the value was stored
    pub stored_at: Instant,
    /// Whether the entry is older than the cache's default TTL
    pub is_expired: bool,
}

/// Thread-safe TTL cache
///
/// The map sits behind a read/write lock that is never held across an await.
/// Two callers missing on the same key concurrently both compute; the last
/// write wins.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty cache using the system clock
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, system_clock())
    }

    /// Creates an empty cache reading time from `clock`
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Default TTL used by [`get`](Self::get) and [`peek`](Self::peek)
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the value if present and younger than the default TTL
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_with_ttl(key, self.ttl)
    }

    /// Returns the value if present and younger than `ttl`
    pub fn get_with_ttl(&self, key: &K, ttl: Duration) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| is_fresh(entry, now, ttl))
            .map(|entry| entry.value.clone())
    }

    /// Returns the entry whether or not it has expired
    ///
    /// Used for graceful degradation: a stale value is better than nothing
    /// when the source is unreachable.
    pub fn peek(&self, key: &K) -> Option<CachedValue<V>> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries.get(key).map(|entry| CachedValue {
            value: entry.value.clone(),
            stored_at: entry.stored_at,
            is_expired: !is_fresh(entry, now, self.ttl),
        })
    }

    /// Stores `value` under `key`, replacing any previous entry
    pub fn insert(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now(),
        };
        self.entries.write().insert(key, entry);
    }

    /// Returns the cached value for `key` or computes and stores it
    ///
    /// # Arguments
    /// * `key` - Cache key; must encode every input that affects the value
    /// * `ttl` - Freshness window applied to the lookup
    /// * `compute` - Produces the value on a miss
    ///
    /// # Returns
    /// * `Ok(V)` - The cached value on a hit, otherwise the computed value
    /// * `Err(E)` - The error from `compute`, unchanged; nothing is cached
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, ttl: Duration, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get_with_ttl(&key, ttl) {
            return Ok(value);
        }

        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Removes a single entry; returns whether one was present
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Removes every entry whose key matches `predicate`
    pub fn invalidate_where<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&K) -> bool,
    {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    /// Removes every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drops entries older than the default TTL, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| is_fresh(entry, now, ttl));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.entries.read().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn is_fresh<V>(entry: &CacheEntry<V>, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(entry.stored_at) < ttl
}
