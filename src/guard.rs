//! # Single-flight read-through fetch
//!
//! [`CacheStampedeGuard`] serves values from the shared store and, on a miss,
//! lets at most one caller across every process recompute the value while the
//! rest wait (or fail fast) according to [`WaitPolicy`].
//!
//! ## Protocol
//!
//! ```text
//! read value key ──hit──────────────────────────────────────────────► return
//!      │ miss (or negative marker with require_non_null)
//!      ▼
//! ┌─► wait bound exceeded? ──yes──► WaitTimeout
//! │    │ no
//! │    ▼
//! │   SET lock key NX PX lock_time
//! │    ├─ acquired ─► re-read ─hit─► release, return
//! │    │               └─miss─► compute, write value or marker, release, return
//! │    └─ held ─► FailFast? ──yes──► LockDenied
//! │                │ no
//! │                ▼
//! │              re-read ──hit──► return
//! └──── sleep ◄────┘ miss
//! ```
//!
//! ## Lease semantics
//!
//! The fill lock is a lease identified only by the existence of the lock key.
//! A holder whose compute outlives `lock_time` can lose the lease to another
//! caller and both will write. Pick `lock_time` well above the slowest
//! expected compute. This is not a mutual-exclusion primitive for work where a
//! double fill would be unsafe.
//!
//! Dropping a `fetch` future while it holds the lease leaves the lock to
//! expire through its TTL.

use crate::config::CacheConfig;
use crate::error::{BoxError, CacheError, CacheResult};
use crate::facade::{decode, encode, KeyValueAccess, StoredValue};
use crate::logging::log_cache_operation;
use crate::store::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Namespace prepended to a value key to form its lock key
pub const LOCK_KEY_PREFIX: &str = "cache-guard:lock:";

/// A value key and the lock key derived from it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    value_key: String,
    lock_key: String,
}

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        let value_key = key.into();
        let lock_key = format!("{LOCK_KEY_PREFIX}{value_key}");
        Self {
            value_key,
            lock_key,
        }
    }

    pub fn value_key(&self) -> &str {
        &self.value_key
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// Outcome of one conditional create on the lock key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    Held,
}

/// Apply the read rule: `Some(result)` ends the fetch, `None` is a miss.
fn resolve(stored: StoredValue, config: &CacheConfig) -> Option<Option<String>> {
    match stored {
        StoredValue::Absent => None,
        StoredValue::Negative if config.require_non_null => None,
        StoredValue::Negative => Some(None),
        StoredValue::Value(payload) => Some(Some(payload)),
    }
}

/// Whole milliseconds for log fields, clamped to `u64::MAX`
fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Read-through cache with fleet-wide single-flight fills
#[derive(Debug, Clone)]
pub struct CacheStampedeGuard<S> {
    access: KeyValueAccess<S>,
}

impl<S: KeyValueStore> CacheStampedeGuard<S> {
    pub fn new(store: S) -> Self {
        Self {
            access: KeyValueAccess::new(store),
        }
    }

    pub fn from_access(access: KeyValueAccess<S>) -> Self {
        Self { access }
    }

    /// Facade used for all store traffic
    pub fn access(&self) -> &KeyValueAccess<S> {
        &self.access
    }

    /// Fetch a raw payload, computing it under the fill lock on a miss
    ///
    /// `compute` returning `None` or an empty string caches the negative marker
    /// and yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// `WaitTimeout` / `LockDenied` on contention, `Store` on backing-store
    /// faults, `Compute` when `compute` fails.
    pub async fn fetch<F, Fut, E>(
        &self,
        key: &str,
        config: &CacheConfig,
        compute: F,
    ) -> CacheResult<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>, E>>,
        E: Into<BoxError>,
    {
        let key = CacheKey::new(key);
        let key_name = key.value_key().to_string();
        self.fetch_payload(&key, config, move || async move {
            match compute().await {
                Ok(value) => Ok(value.filter(|payload| !payload.is_empty())),
                Err(e) => Err(CacheError::Compute {
                    key: key_name,
                    source: e.into(),
                }),
            }
        })
        .await
    }

    /// Fetch a JSON value; `compute` returning `None` is cached as empty
    pub async fn fetch_typed<T, F, Fut, E>(
        &self,
        key: &str,
        config: &CacheConfig,
        compute: F,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<BoxError>,
    {
        let key = CacheKey::new(key);
        let key_name = key.value_key().to_string();
        let payload = self
            .fetch_payload(&key, config, move || async move {
                match compute().await {
                    Ok(Some(value)) => encode(&value).map(Some),
                    Ok(None) => Ok(None),
                    Err(e) => Err(CacheError::Compute {
                        key: key_name,
                        source: e.into(),
                    }),
                }
            })
            .await?;

        match payload {
            Some(raw) => decode(&raw),
            None => Ok(None),
        }
    }

    /// Fetch a JSON list; an empty list from `compute` is cached as empty
    pub async fn fetch_list<T, F, Fut, E>(
        &self,
        key: &str,
        config: &CacheConfig,
        compute: F,
    ) -> CacheResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: Into<BoxError>,
    {
        let key = CacheKey::new(key);
        let key_name = key.value_key().to_string();
        let payload = self
            .fetch_payload(&key, config, move || async move {
                match compute().await {
                    Ok(values) if values.is_empty() => Ok(None),
                    Ok(values) => encode(&values).map(Some),
                    Err(e) => Err(CacheError::Compute {
                        key: key_name,
                        source: e.into(),
                    }),
                }
            })
            .await?;

        match payload {
            Some(raw) => Ok(decode(&raw)?.unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// [`fetch_typed`](Self::fetch_typed) that recomputes over a cached negative marker
    pub async fn fetch_typed_non_null<T, F, Fut, E>(
        &self,
        key: &str,
        config: &CacheConfig,
        compute: F,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<BoxError>,
    {
        let config = config.clone().with_require_non_null(true);
        self.fetch_typed(key, &config, compute).await
    }

    /// [`fetch_list`](Self::fetch_list) that recomputes over a cached negative marker
    pub async fn fetch_list_non_null<T, F, Fut, E>(
        &self,
        key: &str,
        config: &CacheConfig,
        compute: F,
    ) -> CacheResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: Into<BoxError>,
    {
        let config = config.clone().with_require_non_null(true);
        self.fetch_list(key, &config, compute).await
    }

    #[instrument(skip_all, fields(key = %key.value_key()))]
    async fn fetch_payload<F, Fut>(
        &self,
        key: &CacheKey,
        config: &CacheConfig,
        compute: F,
    ) -> CacheResult<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Option<String>>>,
    {
        let stored = self.access.get_stored(key.value_key()).await?;
        if let Some(hit) = resolve(stored, config) {
            debug!(negative = hit.is_none(), "Cache HIT");
            return Ok(hit);
        }

        let begin_wait = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            let waited = begin_wait.elapsed();
            if config.max_wait.is_exceeded(waited) {
                warn!(
                    waited_ms = saturating_millis(waited),
                    attempts = attempts,
                    "Timed out waiting for cache fill"
                );
                log_cache_operation("fetch", key.value_key(), "wait_timeout", None);
                return Err(CacheError::WaitTimeout {
                    key: key.value_key().to_string(),
                    waited,
                });
            }

            attempts += 1;
            match self.try_lock(key, config).await? {
                LockAttempt::Acquired => {
                    info!(attempts = attempts, "Acquired cache fill lock");
                    return self.fill_under_lock(key, config, compute).await;
                }
                LockAttempt::Held if !config.max_wait.allows_waiting() => {
                    warn!("Cache fill lock held, failing fast");
                    return Err(CacheError::LockDenied {
                        key: key.value_key().to_string(),
                    });
                }
                LockAttempt::Held => {
                    let stored = self.access.get_stored(key.value_key()).await?;
                    if let Some(hit) = resolve(stored, config) {
                        debug!(attempts = attempts, "Cache filled by another holder");
                        return Ok(hit);
                    }
                    tokio::time::sleep(config.effective_wait_sleep_time()).await;
                }
            }
        }
    }

    async fn try_lock(&self, key: &CacheKey, config: &CacheConfig) -> CacheResult<LockAttempt> {
        let acquired = self
            .access
            .set_if_absent(key.lock_key(), config.effective_lock_time())
            .await?;

        Ok(if acquired {
            LockAttempt::Acquired
        } else {
            LockAttempt::Held
        })
    }

    /// Run the fill and release the lock on every exit path
    async fn fill_under_lock<F, Fut>(
        &self,
        key: &CacheKey,
        config: &CacheConfig,
        compute: F,
    ) -> CacheResult<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Option<String>>>,
    {
        let outcome = self.fill(key, config, compute).await;
        self.release(key).await;
        outcome
    }

    async fn fill<F, Fut>(
        &self,
        key: &CacheKey,
        config: &CacheConfig,
        compute: F,
    ) -> CacheResult<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<Option<String>>>,
    {
        // Another holder may have filled the key while we were waiting
        let stored = self.access.get_stored(key.value_key()).await?;
        if let Some(hit) = resolve(stored, config) {
            debug!("Cache filled before lock acquisition, skipping compute");
            return Ok(hit);
        }

        let computed = compute().await?;
        let (payload, ttl) = match computed {
            Some(payload) => (Some(payload), config.expire_time),
            None => (None, config.effective_null_expire_time()),
        };

        self.access
            .set(key.value_key(), payload.as_deref(), ttl)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to write computed value");
                e
            })?;

        let details = format!("ttl_ms={}", saturating_millis(ttl));
        let outcome = if payload.is_some() { "filled" } else { "negative" };
        log_cache_operation("fill", key.value_key(), outcome, Some(&details));
        Ok(payload)
    }

    async fn release(&self, key: &CacheKey) {
        if let Err(e) = self.access.delete(key.lock_key()).await {
            error!(
                lock_key = key.lock_key(),
                error = %e,
                "Failed to release cache fill lock, leaving it to lease expiry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WaitPolicy;
    use crate::facade::NEGATIVE_MARKER;
    use crate::store::MemoryStore;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> CacheConfig {
        CacheConfig::new(Duration::from_secs(60))
            .with_max_wait(WaitPolicy::Bounded(Duration::from_secs(1)))
            .with_wait_sleep_time(Duration::from_millis(10))
    }

    #[test]
    fn test_lock_key_is_prefixed() {
        let key = CacheKey::new("user:42");
        assert_eq!(key.value_key(), "user:42");
        assert_eq!(key.lock_key(), "cache-guard:lock:user:42");
    }

    #[test]
    fn test_resolve_rules() {
        let plain = config();
        let strict = config().with_require_non_null(true);

        assert_eq!(resolve(StoredValue::Absent, &plain), None);
        assert_eq!(resolve(StoredValue::Negative, &plain), Some(None));
        assert_eq!(resolve(StoredValue::Negative, &strict), None);
        assert_eq!(
            resolve(StoredValue::Value("1".to_string()), &strict),
            Some(Some("1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fetch_computes_then_serves_from_store() {
        let guard = CacheStampedeGuard::new(MemoryStore::new());
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let value = guard
                .fetch("k", &config(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(Some(r#"{"a":1}"#.to_string()))
                })
                .await
                .unwrap();
            assert_eq!(value.as_deref(), Some(r#"{"a":1}"#));
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(guard.access().get("cache-guard:lock:k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_empty_string_is_negative() {
        let guard = CacheStampedeGuard::new(MemoryStore::new());
        let value = guard
            .fetch("k", &config(), || async { Ok::<_, Infallible>(Some(String::new())) })
            .await
            .unwrap();

        assert_eq!(value, None);
        assert_eq!(
            guard.access().get("k").await.unwrap().as_deref(),
            Some(NEGATIVE_MARKER)
        );
    }

    #[tokio::test]
    async fn test_negative_marker_uses_null_ttl() {
        let store = MemoryStore::new();
        let guard = CacheStampedeGuard::new(store.clone());
        let config = config().with_null_expire_time(Duration::from_secs(2));

        let value: Option<u32> = guard
            .fetch_typed("n", &config, || async { Ok::<_, Infallible>(None) })
            .await
            .unwrap();

        assert_eq!(value, None);
        assert!(store.ttl("n").unwrap() <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_double_check_skips_compute_when_filled() {
        let guard = CacheStampedeGuard::new(MemoryStore::new());
        let key = CacheKey::new("k");
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        guard
            .access()
            .set("k", Some("filled"), Duration::from_secs(60))
            .await
            .unwrap();

        let value = guard
            .fill_under_lock(&key, &config(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some("recomputed".to_string()))
            })
            .await
            .unwrap();

        assert_eq!(value.as_deref(), Some("filled"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_saturating_millis_clamps() {
        assert_eq!(saturating_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_reserved_payload_is_rejected_and_lock_released() {
        let guard = CacheStampedeGuard::new(MemoryStore::new());

        let err = guard
            .fetch("k", &config(), || async {
                Ok::<_, Infallible>(Some(NEGATIVE_MARKER.to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::ReservedValue { ref key } if key == "k"));
        assert_eq!(guard.access().get("k").await.unwrap(), None);
        assert_eq!(guard.access().get("cache-guard:lock:k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_list_round_trip() {
        let guard = CacheStampedeGuard::new(MemoryStore::new());
        let ids: Vec<u32> = guard
            .fetch_list("ids", &config(), || async { Ok::<_, Infallible>(vec![3, 1, 2]) })
            .await
            .unwrap();
        assert_eq!(ids, vec![3, 1, 2]);

        let cached: Vec<u32> = guard
            .fetch_list("ids", &config(), || async {
                Ok::<_, Infallible>(Vec::<u32>::new())
            })
            .await
            .unwrap();
        assert_eq!(cached, vec![3, 1, 2]);
    }
}
