//! Hashed-token deny-list with TTL-bounded cleanup.
//!
//! Tokens are never stored raw: the row key is the SHA-256 hex digest, and
//! the row's TTL matches the token's remaining natural lifetime so the
//! ledger cleans itself. Absence means "not revoked", which also covers
//! naturally expired tokens.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use tollgate_storage::{Storage, StorageExt, StorageKey};

use crate::Result;

/// Storage namespace for revocation rows.
pub const REVOCATION_PREFIX: &str = "revocation:token";

/// A revocation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationRecord {
    /// When the token was revoked, ms epoch
    pub revoked_at: i64,
    /// When the token would have expired anyway, ms epoch
    pub expires_at: i64,
}

/// Deny-list over any storage adapter.
#[derive(Debug, Clone)]
pub struct RevocationLedger {
    storage: Arc<dyn Storage>,
}

impl RevocationLedger {
    /// Create a ledger over `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn row_key(token: &str) -> Result<StorageKey> {
        let digest = hex::encode(Sha256::digest(token.as_bytes()));
        Ok(StorageKey::new([REVOCATION_PREFIX, &digest])?)
    }

    /// Revoke `token` until `expires_at_ms`. The row lives exactly as long
    /// as the token would have, with a one-second floor.
    pub async fn revoke(&self, token: &str, expires_at_ms: i64) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let ttl_secs = ((expires_at_ms - now) / 1000).max(1) as u64;
        let record = RevocationRecord {
            revoked_at: now,
            expires_at: expires_at_ms,
        };
        let key = Self::row_key(token)?;
        debug!(key = %key, ttl_secs, "revoking token");
        self.storage.set_json(&key, &record, Some(ttl_secs)).await?;
        Ok(())
    }

    /// True when `token` is on the deny-list and its row has not expired.
    pub async fn is_revoked(&self, token: &str) -> Result<bool> {
        let record: Option<RevocationRecord> =
            self.storage.get_json(&Self::row_key(token)?).await?;
        Ok(record.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_storage::MemoryStorage;

    #[tokio::test]
    async fn test_revoke_then_check() {
        let ledger = RevocationLedger::new(Arc::new(MemoryStorage::new()));
        let expires = Utc::now().timestamp_millis() + 600_000;

        ledger.revoke("at-12345", expires).await.unwrap();
        assert!(ledger.is_revoked("at-12345").await.unwrap());
        assert!(!ledger.is_revoked("at-other").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_expires_with_token() {
        let ledger = RevocationLedger::new(Arc::new(MemoryStorage::new()));
        // Already past its natural expiry: row gets the 1-second floor.
        let expires = Utc::now().timestamp_millis() - 10_000;
        ledger.revoke("at-stale", expires).await.unwrap();
        assert!(ledger.is_revoked("at-stale").await.unwrap());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(!ledger.is_revoked("at-stale").await.unwrap());
    }

    #[tokio::test]
    async fn test_raw_token_never_stored() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = RevocationLedger::new(storage.clone() as Arc<dyn Storage>);
        ledger
            .revoke("super-secret-token", Utc::now().timestamp_millis() + 60_000)
            .await
            .unwrap();

        let rows = storage
            .scan(&StorageKey::new([REVOCATION_PREFIX]).unwrap())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let (key, _) = &rows[0];
        assert!(!key.encode().contains("super-secret-token"));
    }
}
