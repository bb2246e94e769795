//! Key-value access facade
//!
//! Thin layer over a [`KeyValueStore`] that adds JSON (de)serialization and the
//! negative-marker convention. Every failure surfaces as `CacheError::Store`;
//! nothing is retried here.

use crate::error::{CacheError, CacheResult};
use crate::store::KeyValueStore;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Reserved value meaning "computed, and the result was empty"
///
/// Not valid JSON, so no serialized payload can produce it.
pub const NEGATIVE_MARKER: &str = "!&*!{}";

/// What a value key currently holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// Key does not exist
    Absent,
    /// Negative marker: a computation ran and produced nothing
    Negative,
    /// Serialized payload
    Value(String),
}

impl StoredValue {
    /// Classify a raw store read
    pub fn from_raw(raw: Option<String>) -> Self {
        match raw {
            None => Self::Absent,
            Some(value) if value == NEGATIVE_MARKER => Self::Negative,
            Some(value) => Self::Value(value),
        }
    }

    /// Whether the key exists at all
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    /// Strip the sentinel: the negative marker and absence both become `None`
    pub fn into_payload(self) -> Option<String> {
        match self {
            Self::Value(value) => Some(value),
            Self::Absent | Self::Negative => None,
        }
    }
}

/// Deserialize a payload, treating blank input as absent
pub(crate) fn decode<T: DeserializeOwned>(raw: &str) -> CacheResult<Option<T>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| CacheError::store("deserialize", e))
}

pub(crate) fn encode<T: Serialize>(value: &T) -> CacheResult<String> {
    serde_json::to_string(value).map_err(|e| CacheError::store("serialize", e))
}

/// Defensive access layer over a backing store
#[derive(Debug, Clone)]
pub struct KeyValueAccess<S> {
    store: S,
}

impl<S: KeyValueStore> KeyValueAccess<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Raw scalar read
    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.store.get(key).await
    }

    /// Read and classify a value key
    pub async fn get_stored(&self, key: &str) -> CacheResult<StoredValue> {
        self.store.get(key).await.map(StoredValue::from_raw)
    }

    /// Read and deserialize; blank or missing values are `None`
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => decode(&raw),
            None => Ok(None),
        }
    }

    /// Read and deserialize a list; missing keys are an empty list
    pub async fn get_list<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Vec<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(decode(&raw)?.unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Read a value key written by the guard, honouring the negative marker
    pub async fn get_cached<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get_stored(key).await?.into_payload() {
            Some(payload) => decode(&payload),
            None => Ok(None),
        }
    }

    /// List form of [`get_cached`](Self::get_cached)
    pub async fn get_cached_list<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Vec<T>> {
        Ok(self.get_cached(key).await?.unwrap_or_default())
    }

    /// Write `value` with `ttl`; `None` writes the negative marker
    pub async fn set(&self, key: &str, value: Option<&str>, ttl: Duration) -> CacheResult<()> {
        let stored = match value {
            Some(NEGATIVE_MARKER) => {
                return Err(CacheError::ReservedValue {
                    key: key.to_string(),
                })
            }
            Some(value) => value,
            None => NEGATIVE_MARKER,
        };
        self.store.set(key, stored, ttl).await
    }

    /// Serialize and write `value`; `None` writes the negative marker
    pub async fn set_typed<T: Serialize>(
        &self,
        key: &str,
        value: Option<&T>,
        ttl: Duration,
    ) -> CacheResult<()> {
        let payload = value.map(encode).transpose()?;
        self.set(key, payload.as_deref(), ttl).await
    }

    /// Atomically create `key` with `ttl` if it does not exist
    ///
    /// The stored value is a diagnostic holder token; nothing compares it.
    pub async fn set_if_absent(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let token = format!("{}@{}", Uuid::new_v4(), Utc::now().to_rfc3339());
        let created = self.store.set_if_absent(key, &token, ttl).await?;
        if created {
            debug!(key = key, holder = %token, "Conditional create succeeded");
        }
        Ok(created)
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.store.delete(key).await
    }

    /// Atomic increment that sets `ttl` only when it creates the counter
    pub async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        self.store.increment_with_expiry(key, ttl).await
    }

    /// Atomic increment without expiry handling
    pub async fn increment(&self, key: &str) -> CacheResult<i64> {
        self.store.increment(key).await
    }

    /// Refresh the TTL of an existing key
    pub async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.store.expire(key, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u32,
        name: String,
    }

    fn access() -> KeyValueAccess<MemoryStore> {
        KeyValueAccess::new(MemoryStore::new())
    }

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_negative_marker_is_not_json() {
        assert!(serde_json::from_str::<serde_json::Value>(NEGATIVE_MARKER).is_err());
    }

    #[test]
    fn test_stored_value_classification() {
        assert_eq!(StoredValue::from_raw(None), StoredValue::Absent);
        assert_eq!(
            StoredValue::from_raw(Some(NEGATIVE_MARKER.to_string())),
            StoredValue::Negative
        );
        assert_eq!(
            StoredValue::from_raw(Some("1".to_string())).into_payload(),
            Some("1".to_string())
        );
        assert!(StoredValue::Negative.is_present());
        assert_eq!(StoredValue::Negative.into_payload(), None);
    }

    #[tokio::test]
    async fn test_set_none_writes_negative_marker() {
        let access = access();
        access.set("k", None, TTL).await.unwrap();

        assert_eq!(
            access.get("k").await.unwrap().as_deref(),
            Some(NEGATIVE_MARKER)
        );
        assert_eq!(access.get_stored("k").await.unwrap(), StoredValue::Negative);
    }

    #[tokio::test]
    async fn test_set_rejects_reserved_payload() {
        let access = access();
        let err = access.set("k", Some(NEGATIVE_MARKER), TTL).await.unwrap_err();
        assert!(matches!(err, CacheError::ReservedValue { .. }));
        assert_eq!(access.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_typed_and_blank() {
        let access = access();
        let profile = Profile {
            id: 7,
            name: "ada".to_string(),
        };
        access.set_typed("p", Some(&profile), TTL).await.unwrap();
        access.set("blank", Some("  "), TTL).await.unwrap();

        assert_eq!(access.get_typed::<Profile>("p").await.unwrap(), Some(profile));
        assert_eq!(access.get_typed::<Profile>("blank").await.unwrap(), None);
        assert_eq!(access.get_typed::<Profile>("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_typed_malformed_is_store_error() {
        let access = access();
        access.set("bad", Some("{not json"), TTL).await.unwrap();
        let err = access.get_typed::<Profile>("bad").await.unwrap_err();
        assert!(err.is_store_error());
    }

    #[tokio::test]
    async fn test_get_list_missing_is_empty() {
        let access = access();
        assert!(access.get_list::<u32>("missing").await.unwrap().is_empty());

        access.set("ids", Some("[1,2,3]"), TTL).await.unwrap();
        assert_eq!(access.get_list::<u32>("ids").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_get_cached_unwraps_negative_marker() {
        let access = access();
        access.set_typed::<Vec<u32>>("ids", None, TTL).await.unwrap();
        access.set_typed("one", Some(&1u32), TTL).await.unwrap();

        assert!(access.get_cached_list::<u32>("ids").await.unwrap().is_empty());
        assert_eq!(access.get_cached::<u32>("ids").await.unwrap(), None);
        assert_eq!(access.get_cached::<u32>("one").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_set_if_absent_is_exclusive() {
        let access = access();
        assert!(access.set_if_absent("lock", TTL).await.unwrap());
        assert!(!access.set_if_absent("lock", TTL).await.unwrap());

        assert!(access.delete("lock").await.unwrap());
        assert!(access.set_if_absent("lock", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_counters_and_expire() {
        let access = access();
        assert_eq!(
            access
                .increment_with_expiry("hits", Duration::from_secs(10))
                .await
                .unwrap(),
            1
        );
        assert_eq!(access.increment("hits").await.unwrap(), 2);
        assert!(access.expire("hits", TTL).await.unwrap());
        assert!(access.store().ttl("hits").unwrap() > Duration::from_secs(10));
    }
}
