//! In-memory storage adapter backed by `DashMap`.
//!
//! Suited to tests and single-node deployments. Expiry is lazy: expired
//! rows are dropped when `get` or `scan` touches them.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::trace;

use crate::{
    adapter::{validate_ttl, Storage, MAX_SCAN_RESULTS},
    key::StorageKey,
    Result,
};

#[derive(Debug, Clone)]
struct Row {
    value: Value,
    expires_at: Option<Instant>,
}

impl Row {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// `DashMap`-backed [`Storage`] adapter.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    rows: DashMap<String, Row>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) rows. Test helper.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.rows.iter().filter(|r| !r.value().is_expired(now)).count()
    }

    /// True when no live rows remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &StorageKey) -> Result<Option<Value>> {
        let encoded = key.encode();
        let now = Instant::now();
        let expired = match self.rows.get(&encoded) {
            Some(row) if row.is_expired(now) => true,
            Some(row) => return Ok(Some(row.value.clone())),
            None => return Ok(None),
        };
        if expired {
            trace!(key = %key, "dropping expired row on get");
            self.rows.remove(&encoded);
        }
        Ok(None)
    }

    async fn set(&self, key: &StorageKey, value: Value, ttl_secs: Option<u64>) -> Result<()> {
        let expires_at = match ttl_secs {
            Some(ttl) => Some(Instant::now() + Duration::from_secs(validate_ttl(ttl)?)),
            None => None,
        };
        self.rows.insert(key.encode(), Row { value, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &StorageKey) -> Result<()> {
        self.rows.remove(&key.encode());
        Ok(())
    }

    async fn take(&self, key: &StorageKey) -> Result<Option<Value>> {
        // DashMap removal is atomic: exactly one concurrent taker wins.
        match self.rows.remove(&key.encode()) {
            Some((_, row)) if !row.is_expired(Instant::now()) => Ok(Some(row.value)),
            _ => Ok(None),
        }
    }

    async fn scan(&self, prefix: &StorageKey) -> Result<Vec<(StorageKey, Value)>> {
        let wire_prefix = prefix.encode_as_prefix();
        let exact = prefix.encode();
        let now = Instant::now();
        let mut out = Vec::new();
        let mut expired_keys = Vec::new();

        for entry in self.rows.iter() {
            let encoded = entry.key();
            if encoded != &exact && !encoded.starts_with(&wire_prefix) {
                continue;
            }
            if entry.value().is_expired(now) {
                expired_keys.push(encoded.clone());
                continue;
            }
            out.push((StorageKey::decode(encoded)?, entry.value().value.clone()));
            if out.len() >= MAX_SCAN_RESULTS {
                break;
            }
        }

        for key in expired_keys {
            self.rows.remove(&key);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StorageExt;
    use serde_json::json;

    fn key(segments: &[&str]) -> StorageKey {
        StorageKey::new(segments.iter().copied()).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_remove_round_trip() {
        let store = MemoryStorage::new();
        let k = key(&["oauth:code", "abc"]);

        store.set(&k, json!({"n": 1}), None).await.unwrap();
        assert_eq!(store.get(&k).await.unwrap(), Some(json!({"n": 1})));

        store.remove(&k).await.unwrap();
        assert_eq!(store.get(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let store = MemoryStorage::new();
        let k = key(&["a", "b"]);
        store.set(&k, json!(1), None).await.unwrap();
        store.set(&k, json!(2), None).await.unwrap();
        assert_eq!(store.get(&k).await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_expired_row_reads_absent() {
        let store = MemoryStorage::new();
        let k = key(&["session", "x"]);
        store.set(&k, json!("v"), Some(1)).await.unwrap();
        assert!(store.get(&k).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.get(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prefix_is_segment_aware() {
        let store = MemoryStorage::new();
        store
            .set(&key(&["oauth:refresh", "user:a", "t1"]), json!(1), None)
            .await
            .unwrap();
        store
            .set(&key(&["oauth:refresh", "user:a", "t2"]), json!(2), None)
            .await
            .unwrap();
        store
            .set(&key(&["oauth:refresh", "user:ab", "t3"]), json!(3), None)
            .await
            .unwrap();

        let hits = store.scan(&key(&["oauth:refresh", "user:a"])).await.unwrap();
        assert_eq!(hits.len(), 2);
        for (k, _) in hits {
            assert_eq!(k.segments()[1], "user:a");
        }
    }

    #[tokio::test]
    async fn test_scan_skips_and_deletes_expired() {
        let store = MemoryStorage::new();
        store
            .set(&key(&["ns", "live"]), json!(1), None)
            .await
            .unwrap();
        store
            .set(&key(&["ns", "dead"]), json!(2), Some(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let hits = store.scan(&key(&["ns"])).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.segments()[1], "live");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_take_consumes_exactly_once() {
        let store = MemoryStorage::new();
        let k = key(&["oauth:code", "xyz"]);
        store.set(&k, json!("payload"), Some(60)).await.unwrap();

        assert_eq!(store.take(&k).await.unwrap(), Some(json!("payload")));
        assert_eq!(store.take(&k).await.unwrap(), None);
        assert_eq!(store.get(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            email: String,
        }

        let store = MemoryStorage::new();
        let k = key(&["email", "a@b", "password"]);
        store
            .set_json(&k, &Payload { email: "a@b".into() }, Some(60))
            .await
            .unwrap();
        let loaded: Option<Payload> = store.get_json(&k).await.unwrap();
        assert_eq!(loaded, Some(Payload { email: "a@b".into() }));
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected_by_typed_helper() {
        let store = MemoryStorage::new();
        let k = key(&["a"]);
        assert!(store.set_json(&k, &1u8, Some(0)).await.is_err());
    }
}
