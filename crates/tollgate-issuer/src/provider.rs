//! The provider contract and capability surface.
//!
//! A provider is a state machine mounted at `/<name>` that collects
//! credentials over one or more requests and finishes by calling
//! [`ProviderContext::success`]. Long-lived state goes through `storage`;
//! anything scoped to the in-flight browser session goes through the
//! encrypted [`ProviderSession`] cookie so deployments without session
//! affinity keep working.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::Response;
use axum::Router;
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use tollgate_core::Result;
use tollgate_storage::{Storage, StorageKey};

use crate::issuer::IssuerShared;
use crate::session::{append_set_cookie, CookieRead};

/// Default scratch-cookie lifetime: 10 minutes.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 600;
/// Scratch-cookie ceiling: 24 hours.
pub const MAX_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// What a provider hands to `success`: its name plus whatever claims its
/// flow established. The issuer's subject resolver maps this onto a
/// registered subject variant.
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    /// Provider registration name (`code`, `password`, ...)
    pub provider: String,
    /// Provider-specific claims (e.g. `{"email": "..."}`)
    pub claims: Value,
}

/// A resolved subject: variant name plus schema-validated properties.
#[derive(Debug, Clone)]
pub struct SubjectPayload {
    #[allow(missing_docs)]
    pub subject_type: String,
    #[allow(missing_docs)]
    pub properties: Value,
}

/// Callback receiving the final subject string on success, letting a
/// provider record mappings (email -> subject) or purge old sessions.
pub type SubjectHook = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Options for [`ProviderContext::success`].
#[derive(Clone, Default)]
pub struct SuccessOptions {
    /// Override the computed subject string
    pub subject: Option<String>,
    /// Override the access-token TTL for this grant
    pub ttl_access: Option<u64>,
    /// Override the refresh-token TTL for this grant
    pub ttl_refresh: Option<u64>,
    /// Invoked with the subject string before tokens are issued
    pub on_subject: Option<SubjectHook>,
}

impl std::fmt::Debug for SuccessOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuccessOptions")
            .field("subject", &self.subject)
            .field("ttl_access", &self.ttl_access)
            .field("ttl_refresh", &self.ttl_refresh)
            .field("on_subject", &self.on_subject.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

/// An authentication provider.
///
/// Implementations build their sub-router against the capability surface;
/// the issuer nests it at `/<name>`.
pub trait AuthProvider: Send + Sync + 'static {
    /// Stable provider kind, used in logs
    fn kind(&self) -> &'static str;

    /// Build the provider's routes over the given capabilities.
    fn routes(&self, ctx: ProviderContext) -> Router;
}

/// Capability surface handed to every provider.
#[derive(Clone)]
pub struct ProviderContext {
    name: Arc<str>,
    shared: Arc<IssuerShared>,
}

impl std::fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderContext")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ProviderContext {
    pub(crate) fn new(name: &str, shared: Arc<IssuerShared>) -> Self {
        Self {
            name: Arc::from(name),
            shared,
        }
    }

    /// The registration name this provider is mounted under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The issuer's storage adapter, for long-lived provider state.
    pub fn storage(&self) -> Arc<dyn Storage> {
        self.shared.storage()
    }

    /// Issuer base path, for building absolute links back to this provider.
    pub fn base_path(&self) -> &str {
        self.shared.base_path()
    }

    /// Externally visible origin of the current request.
    pub fn origin(&self, headers: &HeaderMap) -> Result<String> {
        self.shared.origin(headers)
    }

    /// Load this provider's scratch session from the request cookie.
    ///
    /// A cookie that fails to decrypt reads as empty and is rewritten (or
    /// deleted) on commit.
    pub async fn session(&self, headers: &HeaderMap) -> ProviderSession {
        let read: CookieRead<Map<String, Value>> = match self
            .shared
            .cookies()
            .open(&self.name, headers)
            .await
        {
            Ok(read) => read,
            Err(err) => {
                warn!(provider = %self.name, error = %err, "session cookie read failed");
                CookieRead::Corrupt
            }
        };
        match read {
            CookieRead::Valid(values) => ProviderSession::existing(values),
            CookieRead::Missing => ProviderSession::empty(),
            CookieRead::Corrupt => ProviderSession::corrupt(),
        }
    }

    /// Attach the session's pending cookie state to `response` and return
    /// it. This is the `forward` half of the provider contract: renderer
    /// output passes through unchanged apart from Set-Cookie headers.
    pub async fn forward(
        &self,
        headers: &HeaderMap,
        session: ProviderSession,
        mut response: Response,
    ) -> Response {
        let codec = self.shared.cookies();
        if session.should_delete() {
            let removal = codec.removal(&self.name, headers);
            append_set_cookie(response.headers_mut(), &removal);
        } else if session.dirty {
            match codec
                .seal(&self.name, &session.values, session.max_age, headers)
                .await
            {
                Ok(cookie) => append_set_cookie(response.headers_mut(), &cookie),
                Err(err) => {
                    warn!(provider = %self.name, error = %err, "failed to seal session cookie");
                }
            }
        }
        response
    }

    /// Complete authentication.
    ///
    /// Resolves the subject via the issuer's resolver, validates it
    /// against the subject schema, then either redirects with a fresh
    /// authorization code (code flow) or issues tokens directly (token
    /// flow). Both the authorization cookie and this provider's scratch
    /// cookie are deleted on the way out.
    pub async fn success(
        &self,
        headers: &HeaderMap,
        claims: Value,
        opts: SuccessOptions,
    ) -> Result<Response> {
        let output = ProviderOutput {
            provider: self.name.to_string(),
            claims,
        };
        self.shared.complete_success(&self.name, headers, output, opts).await
    }

    /// Remove every refresh payload stored under `subject`.
    pub async fn invalidate(&self, subject: &str) -> Result<()> {
        self.shared.invalidate_subject(subject).await
    }

    /// Route an error through the issuer's funnel: unknown-state goes to
    /// the error renderer, protocol errors redirect back to the client
    /// with the standard `error`/`error_description` pair.
    pub async fn fail(&self, headers: &HeaderMap, err: tollgate_core::AuthError) -> Response {
        self.shared.handle_error(headers, err).await
    }

    /// Build a storage key rooted at arbitrary segments. Thin sugar over
    /// [`StorageKey::new`] so providers do not depend on tollgate-storage
    /// directly.
    pub fn key<const N: usize>(&self, segments: [&str; N]) -> Result<StorageKey> {
        Ok(StorageKey::new(segments)?)
    }
}

/// Mutable view over a provider's encrypted scratch cookie.
#[derive(Debug)]
pub struct ProviderSession {
    values: Map<String, Value>,
    max_age: u64,
    dirty: bool,
    corrupt: bool,
}

impl ProviderSession {
    fn empty() -> Self {
        Self {
            values: Map::new(),
            max_age: DEFAULT_SESSION_TTL_SECS,
            dirty: false,
            corrupt: false,
        }
    }

    fn existing(values: Map<String, Value>) -> Self {
        Self {
            values,
            max_age: DEFAULT_SESSION_TTL_SECS,
            dirty: false,
            corrupt: false,
        }
    }

    fn corrupt() -> Self {
        Self {
            values: Map::new(),
            max_age: DEFAULT_SESSION_TTL_SECS,
            dirty: false,
            corrupt: true,
        }
    }

    /// Read a value previously stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Store a value under `key`, keeping the cookie alive for at least
    /// `ttl_secs` (clamped to 24 hours).
    pub fn set<T: Serialize>(&mut self, key: &str, ttl_secs: u64, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.values.insert(key.to_string(), value);
        self.max_age = self.max_age.max(ttl_secs.min(MAX_SESSION_TTL_SECS));
        self.dirty = true;
        Ok(())
    }

    /// Remove the value under `key`.
    pub fn unset(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.dirty = true;
        }
    }

    /// Drop every value; commit will delete the cookie.
    pub fn clear(&mut self) {
        self.values.clear();
        self.dirty = true;
    }

    fn should_delete(&self) -> bool {
        (self.dirty && self.values.is_empty()) || (self.corrupt && !self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_set_get_unset() {
        let mut session = ProviderSession::empty();
        session.set("state", 600, &json!("abc")).unwrap();
        assert_eq!(session.get::<String>("state").unwrap(), "abc");

        session.unset("state");
        assert_eq!(session.get::<String>("state"), None);
        assert!(session.should_delete());
    }

    #[test]
    fn test_session_max_age_tracks_largest_ttl() {
        let mut session = ProviderSession::empty();
        session.set("a", 60, &1u8).unwrap();
        session.set("b", 1200, &2u8).unwrap();
        assert_eq!(session.max_age, 1200);

        // Clamped to the 24h ceiling.
        session.set("c", MAX_SESSION_TTL_SECS * 5, &3u8).unwrap();
        assert_eq!(session.max_age, MAX_SESSION_TTL_SECS);
    }

    #[test]
    fn test_corrupt_session_deletes_unless_rewritten() {
        let session = ProviderSession::corrupt();
        assert!(session.should_delete());

        let mut rewritten = ProviderSession::corrupt();
        rewritten.set("state", 600, &json!("fresh")).unwrap();
        assert!(!rewritten.should_delete());
    }
}
