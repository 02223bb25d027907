//! The async `Storage` trait and the TTL rules every adapter shares.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{key::StorageKey, Result, StorageError};

/// TTL ceiling: ten years in seconds. Anything above this is almost
/// certainly a milliseconds-for-seconds bug at the call site.
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Upper bound on entries returned by a single `scan` call.
pub const MAX_SCAN_RESULTS: usize = 1000;

/// Validate a caller-supplied TTL before it reaches an adapter.
///
/// # Errors
///
/// Returns [`StorageError::InvalidTtl`] for zero or anything above
/// [`MAX_TTL_SECS`].
pub fn validate_ttl(ttl_secs: u64) -> Result<u64> {
    if ttl_secs == 0 || ttl_secs > MAX_TTL_SECS {
        return Err(StorageError::InvalidTtl(ttl_secs));
    }
    Ok(ttl_secs)
}

/// Storage adapter contract.
///
/// Adapters receive keys already validated and escape-encoded via
/// [`StorageKey`]; they never need to understand segment structure beyond
/// prefix string matching. Expired rows must read as absent and may be
/// deleted lazily. Concurrent `set` on one key is last-writer-wins.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Fetch the value at `key`, or `None` if absent or expired.
    async fn get(&self, key: &StorageKey) -> Result<Option<Value>>;

    /// Store `value` at `key`. `ttl_secs` of `None` means no expiry; the
    /// adapter converts a TTL into an absolute expiry timestamp.
    async fn set(&self, key: &StorageKey, value: Value, ttl_secs: Option<u64>) -> Result<()>;

    /// Delete the value at `key`. Deleting an absent key is not an error.
    async fn remove(&self, key: &StorageKey) -> Result<()>;

    /// Fetch and delete in one step.
    ///
    /// Single-use rows (authorization codes) are consumed through this so
    /// two concurrent consumers cannot both observe the value. The default
    /// is a non-atomic get-then-remove; adapters with a conditional-delete
    /// primitive should override it.
    async fn take(&self, key: &StorageKey) -> Result<Option<Value>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.remove(key).await?;
        }
        Ok(value)
    }

    /// Return up to [`MAX_SCAN_RESULTS`] live entries whose key starts with
    /// every segment of `prefix`, skipping (and optionally deleting)
    /// expired rows. At most one entry per stored key.
    async fn scan(&self, prefix: &StorageKey) -> Result<Vec<(StorageKey, Value)>>;
}

/// Typed helpers layered over the raw [`Storage`] trait.
///
/// Every caller in tollgate goes through these so the JSON boundary stays
/// in one place.
#[async_trait]
pub trait StorageExt: Storage {
    /// `get` decoded into `T`.
    async fn get_json<T: DeserializeOwned>(&self, key: &StorageKey) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// `set` from any serializable value, with TTL validation applied
    /// before the adapter is consulted.
    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &StorageKey,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> Result<()> {
        if let Some(ttl) = ttl_secs {
            validate_ttl(ttl)?;
        }
        self.set(key, serde_json::to_value(value)?, ttl_secs).await
    }
}

#[async_trait]
impl<S: Storage + ?Sized> StorageExt for S {}
