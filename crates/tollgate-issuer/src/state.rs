//! Cookie- and storage-resident flow state.
//!
//! `AuthorizationState` rides in the encrypted `authorization` cookie from
//! `/authorize` until a provider completes. `CodePayload` and
//! `RefreshPayload` live in storage under `oauth:code/<code>` and
//! `oauth:refresh/<subject>/<token>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Seconds an authorization code stays exchangeable.
pub const CODE_TTL_SECS: u64 = 60;

/// Seconds the authorization cookie survives: 24 hours.
pub const AUTHORIZATION_COOKIE_TTL_SECS: u64 = 24 * 60 * 60;

/// The two supported response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Authorization-code flow
    Code,
    /// Implicit flow: tokens in the redirect fragment
    Token,
}

/// A stored PKCE challenge awaiting its verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    /// base64url(SHA-256(verifier))
    pub challenge: String,
    /// Always `S256`
    pub method: String,
}

/// Authorization request state, created by `/authorize` and consumed when
/// a provider completes or `/token` exchanges the resulting code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationState {
    pub response_type: ResponseType,
    #[serde(rename = "redirectURI")]
    pub redirect_uri: String,
    /// Opaque client state echoed back on redirects
    #[serde(default)]
    pub state: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkce: Option<PkceChallenge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Per-grant TTL pair carried by code payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTtl {
    /// Access-token lifetime in seconds
    pub access: u64,
    /// Refresh-token lifetime in seconds
    pub refresh: u64,
}

/// Issuer-wide TTL configuration.
#[derive(Debug, Clone, Copy)]
pub struct TtlConfig {
    /// Access-token lifetime in seconds (default 30 days)
    pub access: u64,
    /// Refresh-token lifetime in seconds (default 365 days)
    pub refresh: u64,
    /// Refresh reuse window in seconds; `<= 0` makes refresh tokens
    /// strictly single-use (default 60)
    pub reuse: i64,
    /// Extra seconds a used refresh stub is retained past the reuse
    /// window, enabling theft detection (default 0)
    pub retention: i64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            access: 30 * 24 * 60 * 60,
            refresh: 365 * 24 * 60 * 60,
            reuse: 60,
            retention: 0,
        }
    }
}

impl TtlConfig {
    /// The per-grant pair recorded on code payloads.
    pub fn token_ttl(&self) -> TokenTtl {
        TokenTtl {
            access: self.access,
            refresh: self.refresh,
        }
    }
}

/// Payload behind `oauth:code/<code>`, exchanged exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodePayload {
    #[serde(rename = "type")]
    pub subject_type: String,
    pub properties: Value,
    pub subject: String,
    #[serde(rename = "redirectURI")]
    pub redirect_uri: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkce: Option<PkceChallenge>,
    pub ttl: TokenTtl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

/// Payload behind `oauth:refresh/<subject>/<token>`.
///
/// `next_token` is reserved at write time so concurrent rotations inside
/// the reuse window all hand back the same successor. `time_used` flips on
/// first rotation and turns the row into the short-lived stub that
/// detects replay past the window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    #[serde(rename = "type")]
    pub subject_type: String,
    pub properties: Value,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub subject: String,
    pub ttl: TokenTtl,
    pub next_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_used: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}
