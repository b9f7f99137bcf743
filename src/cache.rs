// Per-endpoint TTL caches for live and reference lookups.
//
// Each logical endpoint owns one `TtlCache`; keys never cross between them.
// Entries are stamped with epoch milliseconds and are only served while
// younger than the cache's TTL.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for cache stamping, in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock, used to step through TTL boundaries without sleeping.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        ManualClock {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
}

/// Trim and lower-case a raw path parameter so that case and whitespace
/// variants of the same query share one entry.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub entries: usize,
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct TtlCache<T> {
    name: &'static str,
    ttl_ms: i64,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(name: &'static str, ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(name, ttl, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: &'static str,
        ttl: Duration,
        max_entries: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        TtlCache {
            name,
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            max_entries: max_entries.max(1),
            clock,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.max(0) as u64)
    }

    // A poisoned map still holds whole entries: every write is a single insert.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, entry: &CacheEntry<T>, now: i64) -> bool {
        now - entry.timestamp < self.ttl_ms
    }

    /// Returns the value for `key` if it was stored less than one TTL ago.
    /// Stale entries are dropped on the way out.
    pub fn get(&self, key: &str) -> Option<T> {
        let key = normalize_key(key);
        let now = self.clock.now_ms();
        let mut entries = self.lock();

        match entries.get(&key) {
            Some(entry) if self.is_fresh(entry, now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            Some(_) => {
                entries.remove(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Unconditionally stores `value` under `key`, stamped with the current time.
    pub fn set(&self, key: &str, value: T) {
        let key = normalize_key(key);
        let now = self.clock.now_ms();
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            self.make_room(&mut entries, now);
        }

        entries.insert(
            key,
            CacheEntry {
                data: value,
                timestamp: now,
            },
        );
    }

    // Frees space in a full map: expired entries go first, and when none have
    // expired the oldest eighth is evicted in one pass, so the following
    // inserts find room without scanning again.
    fn make_room(&self, entries: &mut HashMap<String, CacheEntry<T>>, now: i64) {
        entries.retain(|_, entry| now - entry.timestamp < self.ttl_ms);
        if entries.len() < self.max_entries {
            return;
        }

        let evict = (self.max_entries / 8).max(1);
        let mut stamps: Vec<i64> = entries.values().map(|entry| entry.timestamp).collect();
        let (_, cutoff, _) = stamps.select_nth_unstable(evict - 1);
        let cutoff = *cutoff;

        let mut removed = 0;
        entries.retain(|_, entry| {
            if removed < evict && entry.timestamp <= cutoff {
                removed += 1;
                false
            } else {
                true
            }
        });
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.timestamp < self.ttl_ms);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            entries: self.len(),
            ttl_secs: self.ttl().as_secs(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
