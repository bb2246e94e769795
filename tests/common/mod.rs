//! Shared helpers for integration tests

use cache_guard::{CacheError, CacheResult, KeyValueStore, MemoryStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    get: AtomicBool,
    set: AtomicBool,
    set_if_absent: AtomicBool,
    delete: AtomicBool,
}

/// Store wrapper that fails selected operations on demand
///
/// State lives in an inner [`MemoryStore`] that tests can inspect directly.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_get(&self, fail: bool) {
        self.faults.get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set(&self, fail: bool) {
        self.faults.set.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set_if_absent(&self, fail: bool) {
        self.faults.set_if_absent.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.faults.delete.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, operation: &'static str) -> CacheResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(CacheError::store(operation, "injected connection reset"))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Self::check(&self.faults.get, "GET")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        Self::check(&self.faults.set, "SET")?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        Self::check(&self.faults.set_if_absent, "SET NX")?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Self::check(&self.faults.delete, "DEL")?;
        self.inner.delete(key).await
    }

    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        self.inner.increment_with_expiry(key, ttl).await
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        self.inner.increment(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(!self.faults.get.load(Ordering::SeqCst))
    }

    fn provider_name(&self) -> &'static str {
        "flaky"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}
