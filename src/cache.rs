//! In-memory result cache bounded by entry count and time-to-live.
//!
//! Entries are keyed by [`CacheKey`] and never mutated after insertion. Two
//! independent eviction rules apply:
//!
//! - **TTL**: an entry whose age is at least `ttl` is treated as absent by
//!   [`ResultCache::get`] and removed on the spot. Expired entries are also
//!   purged before every insert.
//! - **Capacity**: when an insert would exceed `max_size`, the entry with the
//!   oldest insertion is evicted first. Insertions are numbered with a
//!   monotonically increasing sequence, so ties on the timestamp resolve in
//!   FIFO order.
//!
//! A single mutex guards the whole structure. Operations never panic on a
//! poisoned lock. They return [`CacheFault`] and leave it to the caller to
//! treat the fault as a miss.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::fingerprint::CacheKey;

/// Default maximum number of cached results.
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Default lifetime of a cached result.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Source of the current time for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to, for deterministic expiry tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Internal cache failure. Never surfaced to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum CacheFault {
    #[error("cache lock poisoned by a panicking holder")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for CacheFault {
    fn from(_: PoisonError<T>) -> Self {
        CacheFault::Poisoned
    }
}

/// Snapshot of the cache counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

struct Inner<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    // insertion sequence -> key, oldest first
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &CacheKey) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn pop_oldest(&mut self) -> Option<(CacheKey, Entry<V>)> {
        let (_, key) = self.order.pop_first()?;
        let entry = self.entries.remove(&key)?;
        Some((key, entry))
    }
}

/// Bounded TTL cache of classification results.
pub struct ResultCache<V> {
    inner: Mutex<Inner<V>>,
    max_size: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> ResultCache<V> {
    /// Creates a cache driven by the system clock.
    ///
    /// # Panics
    /// Panics if `max_size == 0`.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self::with_clock(max_size, ttl, Arc::new(SystemClock))
    }

    /// Creates a cache driven by `clock`.
    ///
    /// # Panics
    /// Panics if `max_size == 0`.
    pub fn with_clock(max_size: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        assert!(max_size > 0, "cache max_size must be > 0");
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(max_size.min(4096)),
                order: BTreeMap::new(),
                next_seq: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_size,
            ttl,
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<V>>, CacheFault> {
        Ok(self.inner.lock()?)
    }

    fn is_expired(&self, inserted_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(inserted_at) >= self.ttl
    }

    /// Returns the cached value for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &CacheKey) -> Result<Option<V>, CacheFault> {
        let now = self.clock.now();
        let mut inner = self.lock()?;

        let expired = inner
            .entries
            .get(key)
            .map(|entry| self.is_expired(entry.inserted_at, now));

        match expired {
            None => {
                inner.misses += 1;
                Ok(None)
            }
            Some(true) => {
                inner.remove(key);
                inner.misses += 1;
                log::debug!("Cache entry {} expired", key.short());
                Ok(None)
            }
            Some(false) => {
                inner.hits += 1;
                Ok(inner.entries.get(key).map(|entry| entry.value.clone()))
            }
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Expired entries are purged first. If the cache is still full, the
    /// oldest insertions are evicted until there is room.
    pub fn put(&self, key: CacheKey, value: V) -> Result<(), CacheFault> {
        let now = self.clock.now();
        let mut inner = self.lock()?;

        inner.remove(&key);

        // insertion order is also timestamp order, so expired entries sit at the front
        while let Some((_, oldest)) = inner.order.first_key_value() {
            let expired = inner
                .entries
                .get(oldest)
                .is_none_or(|entry| self.is_expired(entry.inserted_at, now));
            if !expired {
                break;
            }
            inner.pop_oldest();
        }

        while inner.entries.len() >= self.max_size {
            match inner.pop_oldest() {
                Some((evicted, _)) => {
                    inner.evictions += 1;
                    log::debug!("Evicted cache entry {}", evicted.short());
                }
                None => break,
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                seq,
            },
        );
        Ok(())
    }

    /// Removes every entry.
    pub fn clear(&self) -> Result<(), CacheFault> {
        let mut inner = self.lock()?;
        inner.entries.clear();
        inner.order.clear();
        Ok(())
    }

    /// Number of stored entries, including ones that expired but were not yet purged.
    pub fn len(&self) -> Result<usize, CacheFault> {
        Ok(self.lock()?.entries.len())
    }

    /// Returns true when no entries are stored, expired ones included.
    pub fn is_empty(&self) -> Result<bool, CacheFault> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of the size, limits and hit/miss/eviction counters.
    pub fn stats(&self) -> Result<CacheStats, CacheFault> {
        let inner = self.lock()?;
        Ok(CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        })
    }

    /// Maximum number of entries.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Lifetime of an entry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Poisons the internal lock, as a panicking holder would.
    #[cfg(test)]
    pub(crate) fn poison(&self)
    where
        V: Send,
    {
        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = self.inner.lock();
                    panic!("poisoning cache lock");
                })
                .join();
        });
    }
}
