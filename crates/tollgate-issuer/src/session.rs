//! Encrypted, HttpOnly cookie session.
//!
//! Values are JSON, sealed as compact JWE (RSA-OAEP-512 + A256GCM) under
//! the key manager's current encryption key. Reads try every loaded
//! encryption key so in-flight cookies survive key rotation; anything that
//! still fails to open is reported corrupt and the caller deletes it.

use std::sync::Arc;

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use cookie::time::Duration as CookieDuration;
use cookie::{Cookie, SameSite};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use tollgate_core::{jwe, KeyManager, Result};

use crate::request::is_secure;

/// Name of the cookie carrying `AuthorizationState`.
pub const AUTHORIZATION_COOKIE: &str = "authorization";

/// Outcome of reading an encrypted cookie.
#[derive(Debug)]
pub enum CookieRead<T> {
    /// No cookie with that name on the request
    Missing,
    /// Decrypted and deserialized successfully
    Valid(T),
    /// Present but unreadable; the caller must delete it
    Corrupt,
}

impl<T> CookieRead<T> {
    /// `Valid` contents, collapsing `Missing`/`Corrupt` to `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Valid(value) => Some(value),
            Self::Missing | Self::Corrupt => None,
        }
    }
}

/// Seals and opens the issuer's encrypted cookies.
#[derive(Clone)]
pub struct CookieCodec {
    keys: Arc<KeyManager>,
    base_path: String,
}

impl std::fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCodec")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

impl CookieCodec {
    /// Create a codec rooted at `base_path` (used as the cookie `Path`).
    pub fn new(keys: Arc<KeyManager>, base_path: impl Into<String>) -> Self {
        Self {
            keys,
            base_path: base_path.into(),
        }
    }

    fn cookie_path(&self) -> String {
        if self.base_path.is_empty() {
            "/".to_string()
        } else {
            self.base_path.clone()
        }
    }

    /// Seal `value` into a Set-Cookie ready cookie.
    pub async fn seal<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        max_age_secs: u64,
        headers: &HeaderMap,
    ) -> Result<Cookie<'static>> {
        let key = self.keys.encryption_key().await?;
        let plaintext = serde_json::to_vec(value)?;
        let sealed = jwe::seal(&plaintext, key.public())?;
        Ok(self.attributes(
            Cookie::new(name.to_string(), sealed),
            headers,
            Some(max_age_secs),
        ))
    }

    /// Read and decrypt the cookie named `name`.
    pub async fn open<T: DeserializeOwned>(
        &self,
        name: &str,
        headers: &HeaderMap,
    ) -> Result<CookieRead<T>> {
        let Some(raw) = find_cookie(headers, name) else {
            return Ok(CookieRead::Missing);
        };

        for key in self.keys.encryption_keys().await?.iter() {
            if let Ok(plaintext) = jwe::open(&raw, key.private()) {
                return match serde_json::from_slice(&plaintext) {
                    Ok(value) => Ok(CookieRead::Valid(value)),
                    Err(err) => {
                        warn!(cookie = name, error = %err, "sealed cookie held unreadable JSON");
                        Ok(CookieRead::Corrupt)
                    }
                };
            }
        }
        debug!(cookie = name, "cookie failed to decrypt under every key");
        Ok(CookieRead::Corrupt)
    }

    /// A removal cookie (`Max-Age: 0`) for `name`.
    pub fn removal(&self, name: &str, headers: &HeaderMap) -> Cookie<'static> {
        self.attributes(Cookie::new(name.to_string(), ""), headers, Some(0))
    }

    fn attributes(
        &self,
        mut cookie: Cookie<'static>,
        headers: &HeaderMap,
        max_age_secs: Option<u64>,
    ) -> Cookie<'static> {
        cookie.set_http_only(true);
        cookie.set_path(self.cookie_path());
        if is_secure(headers, None) {
            cookie.set_secure(true);
            cookie.set_same_site(SameSite::None);
        } else {
            cookie.set_same_site(SameSite::Lax);
        }
        if let Some(secs) = max_age_secs {
            cookie.set_max_age(CookieDuration::seconds(secs as i64));
        }
        cookie
    }
}

/// Find a request cookie value by name.
pub fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for cookie in Cookie::split_parse(raw.to_string()).flatten() {
            if cookie.name() == name && !cookie.value().is_empty() {
                return Some(cookie.value().to_string());
            }
        }
    }
    None
}

/// Append a Set-Cookie header to a response header map.
pub fn append_set_cookie(headers: &mut HeaderMap, cookie: &Cookie<'_>) {
    if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
        headers.append(SET_COOKIE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_storage::MemoryStorage;

    fn codec() -> CookieCodec {
        let storage = Arc::new(MemoryStorage::new());
        CookieCodec::new(Arc::new(KeyManager::new(storage)), "")
    }

    fn request_with(cookie: &Cookie<'_>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{}={}", cookie.name(), cookie.value())).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_seal_open_round_trip() {
        let codec = codec();
        let headers = HeaderMap::new();
        let sealed = codec
            .seal("authorization", &serde_json::json!({"state": "s1"}), 600, &headers)
            .await
            .unwrap();
        assert!(sealed.http_only().unwrap_or(false));
        assert_eq!(sealed.same_site(), Some(SameSite::Lax));

        let request = request_with(&sealed);
        let read: CookieRead<serde_json::Value> =
            codec.open("authorization", &request).await.unwrap();
        match read {
            CookieRead::Valid(value) => assert_eq!(value["state"], "s1"),
            other => panic!("expected valid cookie, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_https_request_gets_secure_none() {
        let codec = codec();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let sealed = codec
            .seal("authorization", &1u8, 600, &headers)
            .await
            .unwrap();
        assert_eq!(sealed.secure(), Some(true));
        assert_eq!(sealed.same_site(), Some(SameSite::None));
    }

    #[tokio::test]
    async fn test_garbage_cookie_reads_corrupt() {
        let codec = codec();
        let mut request = HeaderMap::new();
        request.insert(
            COOKIE,
            HeaderValue::from_static("authorization=not-a-jwe"),
        );
        let read: CookieRead<serde_json::Value> =
            codec.open("authorization", &request).await.unwrap();
        assert!(matches!(read, CookieRead::Corrupt));
    }

    #[tokio::test]
    async fn test_missing_cookie_reads_missing() {
        let codec = codec();
        let read: CookieRead<serde_json::Value> =
            codec.open("authorization", &HeaderMap::new()).await.unwrap();
        assert!(matches!(read, CookieRead::Missing));
    }

    #[test]
    fn test_removal_cookie_zeroes_max_age() {
        let codec = codec();
        let removal = codec.removal("authorization", &HeaderMap::new());
        assert_eq!(removal.max_age(), Some(CookieDuration::seconds(0)));
        assert_eq!(removal.value(), "");
    }
}
