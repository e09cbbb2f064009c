//! Transport cache of pre-generated content.
//!
//! Records expire lazily: a read past the TTL drops the record and misses.
//! Eviction at capacity removes the oldest inserted record; reads never change
//! eviction order and overwriting a key keeps its position.

use crate::clock::Clock;
use crate::models::GenerationTarget;
use crate::storage::sqlite::acquire_lock;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Cache key: student, grade, subject, skill, container and question type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// The key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&GenerationTarget> for CacheKey {
    fn from(target: &GenerationTarget) -> Self {
        Self(target.to_string())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One cached payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    /// The content.
    pub payload: Value,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
    /// Lifetime from `created_at`.
    pub ttl: Duration,
    /// Reads served by this record.
    pub hit_count: u64,
}

impl CacheRecord {
    /// True once `now` is past `created_at + ttl`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.created_at + self.ttl
    }
}

/// Counters and sizes of a [`TransportCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Records currently held, expired ones included.
    pub entries: usize,
    /// Maximum records.
    pub capacity: usize,
    /// Reads that returned a payload.
    pub hits: u64,
    /// Reads that found nothing or an expired record.
    pub misses: u64,
    /// Records dropped because their TTL elapsed.
    pub expirations: u64,
    /// Records dropped to make room.
    pub evictions: u64,
}

/// Bounded, TTL-checked cache of generated payloads.
pub struct TransportCache {
    entries: Mutex<LruCache<CacheKey, CacheRecord>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

impl TransportCache {
    /// Creates a cache of `capacity` records (at least one), each living `ttl`.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the payload for `key` and counts a hit, unless missing or expired.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.get_record(key).map(|record| record.payload)
    }

    /// Like [`Self::get`] but returns the whole record after counting the hit.
    pub fn get_record(&self, key: &CacheKey) -> Option<CacheRecord> {
        let now = self.clock.now();
        let mut entries = acquire_lock(&self.entries);
        let (hit, expired) = match entries.peek_mut(key) {
            Some(record) if !record.is_expired(now) => {
                record.hit_count += 1;
                (Some(record.clone()), false)
            },
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            entries.pop(key);
        }
        drop(entries);

        if let Some(record) = hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("transport_cache_lookups_total", "result" => "hit").increment(1);
            return Some(record);
        }
        if expired {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "transport_cache_lookups_total",
            "result" => if expired { "expired" } else { "miss" }
        )
        .increment(1);
        None
    }

    /// True when `key` holds an unexpired record. Counts nothing.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = self.clock.now();
        acquire_lock(&self.entries)
            .peek(key)
            .is_some_and(|record| !record.is_expired(now))
    }

    /// Stores `payload` under `key` with the cache TTL.
    ///
    /// An existing record is overwritten in place, its hit count reset.
    pub fn set(&self, key: CacheKey, payload: Value) {
        let record = CacheRecord {
            payload,
            created_at: self.clock.now(),
            ttl: self.ttl,
            hit_count: 0,
        };
        let mut entries = acquire_lock(&self.entries);
        if let Some(existing) = entries.peek_mut(&key) {
            *existing = record;
            return;
        }
        if let Some((evicted, _)) = entries.push(key, record) {
            drop(entries);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("transport_cache_evictions_total").increment(1);
            tracing::debug!(key = %evicted, "transport cache evicted oldest record");
        }
    }

    /// Records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.entries).len()
    }

    /// True when no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = acquire_lock(&self.entries);
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
