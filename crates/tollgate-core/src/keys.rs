//! Signing and encryption key lifecycle.
//!
//! Two independent pools are persisted one key pair per storage row:
//! ES256 signing keys under `signing:key/<id>` and RSA-OAEP-512 encryption
//! keys under `encryption:key/<id>`. Loading is lazy and memoized per
//! process; when no non-expired key exists a fresh pair is generated and
//! persisted. Concurrent first callers may each generate a key - storage is
//! last-writer-wins per row and every generated key stays valid, so all
//! callers converge on usable material.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use tollgate_storage::{Storage, StorageExt, StorageKey};

use crate::{AuthError, Result};

/// Storage namespace for signing key rows.
pub const SIGNING_PREFIX: &str = "signing:key";
/// Storage namespace for encryption key rows.
pub const ENCRYPTION_PREFIX: &str = "encryption:key";

const RSA_BITS: usize = 2048;

/// Persisted form of a key pair: PEM-encoded halves plus lifecycle stamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKeyPair {
    /// Random 16-byte hex identifier, also the JWK `kid`
    pub id: String,
    /// JOSE algorithm name (`ES256` or `RSA-OAEP-512`)
    pub alg: String,
    /// SPKI PEM public half
    pub public_pem: String,
    /// PKCS#8 PEM private half
    pub private_pem: String,
    /// Creation time, milliseconds since epoch
    pub created: i64,
    /// Expiry time in milliseconds, when the pair has been rotated out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<i64>,
}

fn new_key_id() -> String {
    hex::encode(crate::random::secure_bytes(16))
}

/// An ES256 signing key pair with its public JWK view.
pub struct SigningKeyPair {
    /// Key identifier (`kid`)
    pub id: String,
    /// Creation time, ms epoch
    pub created: i64,
    /// Expiry time, ms epoch, if rotated out
    pub expired: Option<i64>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    jwk: Value,
    stored: StoredKeyPair,
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("id", &self.id)
            .field("created", &self.created)
            .field("expired", &self.expired)
            .finish_non_exhaustive()
    }
}

impl SigningKeyPair {
    /// Generate a fresh P-256 pair.
    pub fn generate() -> Result<Self> {
        let secret = p256::SecretKey::random(&mut OsRng);
        let private_pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::Crypto(format!("ec private pem: {e}")))?
            .to_string();
        let public_pem = secret
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::Crypto(format!("ec public pem: {e}")))?;
        let stored = StoredKeyPair {
            id: new_key_id(),
            alg: "ES256".to_string(),
            public_pem,
            private_pem,
            created: Utc::now().timestamp_millis(),
            expired: None,
        };
        info!(kid = %stored.id, "generated signing key pair");
        Self::from_stored(stored)
    }

    /// Rehydrate from a persisted row.
    ///
    /// # Errors
    ///
    /// Fails when either PEM half does not parse as a P-256 key.
    pub fn from_stored(stored: StoredKeyPair) -> Result<Self> {
        let public = p256::PublicKey::from_public_key_pem(&stored.public_pem)
            .map_err(|e| AuthError::Crypto(format!("ec public pem parse: {e}")))?;
        let encoding = EncodingKey::from_ec_pem(stored.private_pem.as_bytes())
            .map_err(|e| AuthError::Crypto(format!("ec private pem parse: {e}")))?;
        let decoding = DecodingKey::from_ec_pem(stored.public_pem.as_bytes())
            .map_err(|e| AuthError::Crypto(format!("ec public decoding key: {e}")))?;

        let point = public.to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| AuthError::Crypto("ec point missing x".into()))?;
        let y = point
            .y()
            .ok_or_else(|| AuthError::Crypto("ec point missing y".into()))?;
        let jwk = json!({
            "kty": "EC",
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode(x),
            "y": URL_SAFE_NO_PAD.encode(y),
            "kid": stored.id,
            "use": "sig",
        });

        Ok(Self {
            id: stored.id.clone(),
            created: stored.created,
            expired: stored.expired,
            encoding,
            decoding,
            jwk,
            stored,
        })
    }

    /// The persisted row form.
    pub fn stored(&self) -> &StoredKeyPair {
        &self.stored
    }

    /// Signing half, for `jsonwebtoken::encode`.
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    /// Verification half, for signature probes and tests.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// Public JWK view with `kid` and `use = "sig"`.
    pub fn jwk(&self) -> &Value {
        &self.jwk
    }

    /// JWKS entry: the JWK plus `alg`, and `exp` (seconds) when expired.
    pub fn jwks_entry(&self) -> Value {
        let mut entry = self.jwk.clone();
        entry["alg"] = json!("ES256");
        if let Some(expired_ms) = self.expired {
            entry["exp"] = json!(expired_ms / 1000);
        }
        entry
    }
}

/// An RSA-OAEP-512 encryption key pair used to seal cookie payloads.
pub struct EncryptionKeyPair {
    /// Key identifier
    pub id: String,
    /// Creation time, ms epoch
    pub created: i64,
    /// Expiry time, ms epoch, if rotated out
    pub expired: Option<i64>,
    public: RsaPublicKey,
    private: RsaPrivateKey,
    stored: StoredKeyPair,
}

impl std::fmt::Debug for EncryptionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKeyPair")
            .field("id", &self.id)
            .field("created", &self.created)
            .field("expired", &self.expired)
            .finish_non_exhaustive()
    }
}

impl EncryptionKeyPair {
    /// Generate a fresh RSA-2048 pair. Noticeably slower than EC
    /// generation, hence the info-level log on completion.
    pub fn generate() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
            .map_err(|e| AuthError::Crypto(format!("rsa keygen: {e}")))?;
        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::Crypto(format!("rsa private pem: {e}")))?
            .to_string();
        let public_pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::Crypto(format!("rsa public pem: {e}")))?;
        let stored = StoredKeyPair {
            id: new_key_id(),
            alg: "RSA-OAEP-512".to_string(),
            public_pem,
            private_pem,
            created: Utc::now().timestamp_millis(),
            expired: None,
        };
        info!(kid = %stored.id, "generated encryption key pair");
        Self::from_stored(stored)
    }

    /// Rehydrate from a persisted row.
    pub fn from_stored(stored: StoredKeyPair) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(&stored.private_pem)
            .map_err(|e| AuthError::Crypto(format!("rsa private pem parse: {e}")))?;
        let public = RsaPublicKey::from_public_key_pem(&stored.public_pem)
            .map_err(|e| AuthError::Crypto(format!("rsa public pem parse: {e}")))?;
        Ok(Self {
            id: stored.id.clone(),
            created: stored.created,
            expired: stored.expired,
            public,
            private,
            stored,
        })
    }

    /// The persisted row form.
    pub fn stored(&self) -> &StoredKeyPair {
        &self.stored
    }

    /// Public half, used to seal.
    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Private half, used to open.
    pub fn private(&self) -> &RsaPrivateKey {
        &self.private
    }
}

/// Lazily initialized, storage-backed key pools.
///
/// Both pools are memoized per process behind an `RwLock<Option<..>>`;
/// `reset` clears them for tests.
pub struct KeyManager {
    storage: Arc<dyn Storage>,
    signing: RwLock<Option<Arc<Vec<Arc<SigningKeyPair>>>>>,
    encryption: RwLock<Option<Arc<Vec<Arc<EncryptionKeyPair>>>>>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager").finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Create a manager over any storage adapter.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            signing: RwLock::new(None),
            encryption: RwLock::new(None),
        }
    }

    /// All signing keys, newest first, generating one when every persisted
    /// key is expired (or none exist).
    pub async fn signing_keys(&self) -> Result<Arc<Vec<Arc<SigningKeyPair>>>> {
        if let Some(cached) = self.signing.read().await.clone() {
            return Ok(cached);
        }
        let loaded = Arc::new(self.load_signing().await?);
        *self.signing.write().await = Some(loaded.clone());
        Ok(loaded)
    }

    /// The current signing key: newest by `created` with no `expired` stamp.
    pub async fn signing_key(&self) -> Result<Arc<SigningKeyPair>> {
        self.signing_keys()
            .await?
            .iter()
            .find(|k| k.expired.is_none())
            .cloned()
            .ok_or_else(|| AuthError::Key("no non-expired signing key".into()))
    }

    /// All encryption keys, newest first.
    pub async fn encryption_keys(&self) -> Result<Arc<Vec<Arc<EncryptionKeyPair>>>> {
        if let Some(cached) = self.encryption.read().await.clone() {
            return Ok(cached);
        }
        let loaded = Arc::new(self.load_encryption().await?);
        *self.encryption.write().await = Some(loaded.clone());
        Ok(loaded)
    }

    /// The current encryption key.
    pub async fn encryption_key(&self) -> Result<Arc<EncryptionKeyPair>> {
        self.encryption_keys()
            .await?
            .iter()
            .find(|k| k.expired.is_none())
            .cloned()
            .ok_or_else(|| AuthError::Key("no non-expired encryption key".into()))
    }

    /// The published JWKS document: every signing key's JWK entry.
    pub async fn jwks(&self) -> Result<Value> {
        let keys = self.signing_keys().await?;
        let entries: Vec<Value> = keys.iter().map(|k| k.jwks_entry()).collect();
        Ok(json!({ "keys": entries }))
    }

    /// Drop both memoized pools so the next call reloads from storage.
    pub async fn reset(&self) {
        *self.signing.write().await = None;
        *self.encryption.write().await = None;
    }

    async fn load_signing(&self) -> Result<Vec<Arc<SigningKeyPair>>> {
        let prefix = StorageKey::new([SIGNING_PREFIX])?;
        let mut keys = Vec::new();
        for (row_key, value) in self.storage.scan(&prefix).await? {
            match serde_json::from_value::<StoredKeyPair>(value)
                .map_err(AuthError::from)
                .and_then(SigningKeyPair::from_stored)
            {
                Ok(pair) => keys.push(Arc::new(pair)),
                Err(err) => warn!(key = %row_key, error = %err, "skipping unreadable signing key row"),
            }
        }
        keys.sort_by(|a, b| b.created.cmp(&a.created));

        if keys.iter().any(|k| k.expired.is_none()) {
            debug!(count = keys.len(), "loaded signing keys from storage");
            return Ok(keys);
        }

        let fresh = SigningKeyPair::generate()?;
        let row = StorageKey::new([SIGNING_PREFIX, &fresh.id])?;
        self.storage.set_json(&row, fresh.stored(), None).await?;
        keys.insert(0, Arc::new(fresh));
        Ok(keys)
    }

    async fn load_encryption(&self) -> Result<Vec<Arc<EncryptionKeyPair>>> {
        let prefix = StorageKey::new([ENCRYPTION_PREFIX])?;
        let mut keys = Vec::new();
        for (row_key, value) in self.storage.scan(&prefix).await? {
            match serde_json::from_value::<StoredKeyPair>(value)
                .map_err(AuthError::from)
                .and_then(EncryptionKeyPair::from_stored)
            {
                Ok(pair) => keys.push(Arc::new(pair)),
                Err(err) => warn!(key = %row_key, error = %err, "skipping unreadable encryption key row"),
            }
        }
        keys.sort_by(|a, b| b.created.cmp(&a.created));

        if keys.iter().any(|k| k.expired.is_none()) {
            debug!(count = keys.len(), "loaded encryption keys from storage");
            return Ok(keys);
        }

        let fresh = EncryptionKeyPair::generate()?;
        let row = StorageKey::new([ENCRYPTION_PREFIX, &fresh.id])?;
        self.storage.set_json(&row, fresh.stored(), None).await?;
        keys.insert(0, Arc::new(fresh));
        Ok(keys)
    }
}
