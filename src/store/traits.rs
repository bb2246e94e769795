//! Backing store contract

use crate::error::CacheResult;
use std::future::Future;
use std::time::Duration;

/// Operations a shared key-value store must offer for the cache guard
///
/// `set_if_absent` and `increment_with_expiry` must each be a single atomic
/// operation on the store itself. Every process coordinating through the store
/// relies on that; nothing above this trait can make them atomic after the fact.
pub trait KeyValueStore: Send + Sync {
    /// Get the raw value at `key`
    ///
    /// Returns `Ok(None)` when the key does not exist or has expired.
    fn get(&self, key: &str) -> impl Future<Output = CacheResult<Option<String>>> + Send;

    /// Set `key` to `value`, replacing any previous value and TTL
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = CacheResult<()>> + Send;

    /// Create `key` only if it does not exist; returns whether it was created
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Delete `key`; returns whether it existed
    fn delete(&self, key: &str) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Increment the integer counter at `key` by one
    ///
    /// Applies `ttl` only on the increment that creates the counter.
    fn increment_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = CacheResult<i64>> + Send;

    /// Increment the integer counter at `key` by one, leaving its TTL alone
    fn increment(&self, key: &str) -> impl Future<Output = CacheResult<i64>> + Send;

    /// Reset the TTL of an existing key; returns whether the key existed
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Check if the store is reachable
    fn health_check(&self) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Name of the store implementation
    fn provider_name(&self) -> &'static str;

    /// Whether state is shared across processes
    ///
    /// Only distributed stores give fleet-wide single-flight.
    fn is_distributed(&self) -> bool {
        true
    }
}
