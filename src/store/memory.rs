//! In-process store on `DashMap`
//!
//! Implements the full store contract with per-entry TTLs. Conditional create
//! and the counter primitive run under the map's per-shard entry lock, which
//! makes them atomic for every task in the process.
//!
//! Expired entries are dropped lazily on read and swept from the whole map
//! every [`SWEEP_INTERVAL`] writes, so keys that are never read again do not
//! accumulate.
//!
//! **Important**: state is NOT shared between processes. Single-flight only
//! holds across tasks of one process when this store is used.

use crate::error::{CacheError, CacheResult};
use crate::store::traits::KeyValueStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Writes between full sweeps of expired entries
pub const SWEEP_INTERVAL: usize = 1024;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    /// A TTL too large to represent as an `Instant` means no expiry
    fn with_ttl(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory store with per-entry TTL
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredEntry>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time to live for `key`
    ///
    /// `None` when the key is missing or carries no expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether the store holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed = removed, "Swept expired entries (memory)");
        }
        removed
    }

    /// Count a write and sweep on every `SWEEP_INTERVAL`th one
    ///
    /// Must not be called while holding an entry guard; `retain` locks every shard.
    fn record_write(&self) {
        let count = self.writes.fetch_add(1, Ordering::Relaxed);
        if count % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.purge_expired();
        }
    }

    fn parse_counter(key: &str, value: &str) -> CacheResult<i64> {
        value.parse::<i64>().map_err(|_| {
            CacheError::store("INCR", format!("value at '{key}' is not an integer"))
        })
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let found = self
            .entries
            .get(key)
            .map(|entry| (entry.value.clone(), entry.is_expired(now)));

        // The read guard is released above; removing under it would deadlock the shard
        let result = match found {
            Some((_, true)) => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                None
            }
            Some((value, false)) => Some(value),
            None => None,
        };

        if result.is_some() {
            debug!(key = key, "Store HIT (memory)");
        } else {
            debug!(key = key, "Store MISS (memory)");
        }

        Ok(result)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.entries
            .insert(key.to_string(), StoredEntry::with_ttl(value.to_string(), ttl));
        self.record_write();

        debug!(
            key = key,
            ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            "Store SET (memory)"
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        let created = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoredEntry::with_ttl(value.to_string(), ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::with_ttl(value.to_string(), ttl));
                true
            }
        };

        if created {
            self.record_write();
        }

        debug!(key = key, created = created, "Store SET NX (memory)");
        Ok(created)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let removed = self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now));

        debug!(key = key, removed = removed, "Store DEL (memory)");
        Ok(removed)
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let now = Instant::now();
        let value = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let next = Self::parse_counter(key, &occupied.get().value)? + 1;
                occupied.get_mut().value = next.to_string();
                next
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(StoredEntry::with_ttl("1".to_string(), ttl));
                1
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::with_ttl("1".to_string(), ttl));
                1
            }
        };

        self.record_write();
        Ok(value)
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        let now = Instant::now();
        let fresh = || StoredEntry {
            value: "1".to_string(),
            expires_at: None,
        };
        let value = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let next = Self::parse_counter(key, &occupied.get().value)? + 1;
                occupied.get_mut().value = next.to_string();
                next
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(fresh());
                1
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh());
                1
            }
        };

        self.record_write();
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = now.checked_add(ttl);
                true
            }
            _ => false,
        })
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}
