//! # Tollgate Client - relying-party verification
//!
//! The client half of the issuer contract: discover endpoints, build
//! authorization URLs (with PKCE when asked), exchange codes, rotate
//! refresh tokens, and verify access JWTs against a cached JWKS with
//! transparent refresh on expiry.
//!
//! Results are explicit: every operation returns `Result<_, ClientError>`
//! and verification failures never panic or surface as anything other
//! than the typed invalid-token variants.
//!
//! Both caches (server metadata, JWKS) live on the [`Client`] value;
//! share one client per process and they are process-wide. Tests can
//! clear them with [`Client::reset_caches`].

use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use tollgate_core::{pkce, random::default_token, AccessClaims, SubjectSchema};

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by the verification library.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// `/token` rejected the authorization code
    #[error("authorization code is invalid")]
    InvalidAuthorizationCode,

    /// `/token` rejected the refresh token
    #[error("refresh token is invalid")]
    InvalidRefreshToken,

    /// The access token failed verification
    #[error("access token is invalid: {0}")]
    InvalidAccessToken(String),

    /// The token's subject does not match any registered variant
    #[error("subject is invalid: {0}")]
    InvalidSubject(String),

    /// Discovery or JWKS retrieval failed
    #[error("issuer discovery failed: {0}")]
    Discovery(String),
}

/// Authorization-server metadata from the well-known document.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerMetadata {
    #[allow(missing_docs)]
    pub issuer: String,
    #[allow(missing_docs)]
    pub authorization_endpoint: String,
    #[allow(missing_docs)]
    pub token_endpoint: String,
    #[allow(missing_docs)]
    pub jwks_uri: String,
}

/// CSRF/PKCE material the caller must hold until the callback.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Opaque state echoed back on the redirect
    pub state: String,
    /// PKCE verifier, present when PKCE was requested
    pub verifier: Option<String>,
}

/// A computed authorization URL plus its challenge.
#[derive(Debug, Clone)]
pub struct AuthorizeUrl {
    #[allow(missing_docs)]
    pub url: String,
    #[allow(missing_docs)]
    pub challenge: Challenge,
}

/// Options for [`Client::authorize`].
#[derive(Debug, Clone, Default)]
pub struct AuthorizeOptions {
    /// Generate a PKCE pair and attach the challenge
    pub pkce: bool,
    /// Skip the provider selector and land on this provider
    pub provider: Option<String>,
    /// Requested scopes
    pub scopes: Vec<String>,
}

/// A token pair from `/token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    #[allow(missing_docs)]
    pub access: String,
    #[allow(missing_docs)]
    pub refresh: String,
    /// Access-token lifetime in seconds
    pub expires_in: u64,
}

/// The verified subject of an access token.
#[derive(Debug, Clone)]
pub struct Subject {
    /// Variant name (e.g. `user`)
    pub subject_type: String,
    /// Schema-validated properties
    pub properties: Value,
}

/// Outcome of [`Client::verify`].
#[derive(Debug, Clone)]
pub struct VerifyResult {
    #[allow(missing_docs)]
    pub subject: Subject,
    /// Subject string from the `sub` claim
    pub subject_id: String,
    /// Audience the token was minted for
    pub aud: String,
    /// Fresh tokens, present when verification refreshed transparently;
    /// callers should persist them
    pub tokens: Option<Tokens>,
}

/// Options for [`Client::verify`].
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Refresh token to rotate when the access token is expired
    pub refresh: Option<String>,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// OAuth client id; becomes the expected audience
    pub client_id: String,
    /// Issuer base URL (scheme://host[:port][/base])
    pub issuer: String,
    /// Custom HTTP client; defaults to a fresh `reqwest::Client`
    pub http: Option<reqwest::Client>,
}

/// The verification client.
#[derive(Debug)]
pub struct Client {
    client_id: String,
    issuer: String,
    http: reqwest::Client,
    metadata: RwLock<Option<Arc<ServerMetadata>>>,
    jwks: RwLock<Option<Arc<JwkSet>>>,
}

impl Client {
    /// Create a client for `issuer`.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client_id: config.client_id,
            issuer: config.issuer.trim_end_matches('/').to_string(),
            http: config.http.unwrap_or_default(),
            metadata: RwLock::new(None),
            jwks: RwLock::new(None),
        }
    }

    /// Drop both caches; the next call re-fetches.
    pub async fn reset_caches(&self) {
        *self.metadata.write().await = None;
        *self.jwks.write().await = None;
    }

    /// The issuer's metadata document, cached after the first fetch.
    pub async fn metadata(&self) -> Result<Arc<ServerMetadata>> {
        if let Some(cached) = self.metadata.read().await.clone() {
            return Ok(cached);
        }
        let url = format!("{}/.well-known/oauth-authorization-server", self.issuer);
        debug!(url = %url, "fetching issuer metadata");
        let metadata: ServerMetadata = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Discovery(format!("metadata fetch: {e}")))?
            .error_for_status()
            .map_err(|e| ClientError::Discovery(format!("metadata status: {e}")))?
            .json()
            .await
            .map_err(|e| ClientError::Discovery(format!("metadata parse: {e}")))?;
        let metadata = Arc::new(metadata);
        *self.metadata.write().await = Some(metadata.clone());
        Ok(metadata)
    }

    async fn jwks(&self) -> Result<Arc<JwkSet>> {
        if let Some(cached) = self.jwks.read().await.clone() {
            return Ok(cached);
        }
        let metadata = self.metadata().await?;
        debug!(url = %metadata.jwks_uri, "fetching issuer JWKS");
        let jwks: JwkSet = self
            .http
            .get(&metadata.jwks_uri)
            .send()
            .await
            .map_err(|e| ClientError::Discovery(format!("jwks fetch: {e}")))?
            .error_for_status()
            .map_err(|e| ClientError::Discovery(format!("jwks status: {e}")))?
            .json()
            .await
            .map_err(|e| ClientError::Discovery(format!("jwks parse: {e}")))?;
        let jwks = Arc::new(jwks);
        *self.jwks.write().await = Some(jwks.clone());
        Ok(jwks)
    }

    /// Compute the authorization URL and the challenge the caller must
    /// hold on to.
    pub async fn authorize(
        &self,
        redirect_uri: &str,
        response_type: &str,
        opts: AuthorizeOptions,
    ) -> Result<AuthorizeUrl> {
        let metadata = self.metadata().await?;
        let state = default_token();
        let pkce_pair = opts.pkce.then(pkce::generate_default);

        let mut url = url::form_urlencoded::Serializer::new(format!(
            "{}?",
            metadata.authorization_endpoint
        ));
        url.append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", response_type)
            .append_pair("state", &state);
        if !opts.scopes.is_empty() {
            url.append_pair("scope", &opts.scopes.join(" "));
        }
        if let Some(pair) = &pkce_pair {
            url.append_pair("code_challenge", &pair.challenge)
                .append_pair("code_challenge_method", &pair.method);
        }
        if let Some(provider) = &opts.provider {
            url.append_pair("provider", provider);
        }

        Ok(AuthorizeUrl {
            url: url.finish(),
            challenge: Challenge {
                state,
                verifier: pkce_pair.map(|p| p.verifier),
            },
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Option<Tokens> {
        let metadata = self.metadata().await.ok()?;
        let response = self
            .http
            .post(&metadata.token_endpoint)
            .form(form)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        Some(Tokens {
            access: body.get("access_token")?.as_str()?.to_string(),
            refresh: body.get("refresh_token")?.as_str()?.to_string(),
            expires_in: body.get("expires_in")?.as_u64()?,
        })
    }

    /// Exchange an authorization code.
    ///
    /// # Errors
    ///
    /// Any transport failure, non-2xx status, or malformed body collapses
    /// to [`ClientError::InvalidAuthorizationCode`].
    pub async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: Option<&str>,
    ) -> Result<Tokens> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(verifier) = verifier {
            form.push(("code_verifier", verifier));
        }
        self.token_request(&form)
            .await
            .ok_or(ClientError::InvalidAuthorizationCode)
    }

    /// Rotate a refresh token.
    ///
    /// When `access` is supplied and still verifies, no rotation happens
    /// and `Ok(None)` is returned.
    pub async fn refresh(&self, refresh_token: &str, access: Option<&str>) -> Result<Option<Tokens>> {
        if let Some(access) = access {
            if self.decode_valid(access).await.is_ok() {
                return Ok(None);
            }
        }
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
        .map(Some)
        .ok_or(ClientError::InvalidRefreshToken)
    }

    async fn decoding_key_for(&self, token: &str) -> Result<(DecodingKey, Algorithm)> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| ClientError::InvalidAccessToken(format!("unreadable header: {e}")))?;
        let jwks = self.jwks().await?;
        let jwk = header
            .kid
            .as_deref()
            .and_then(|kid| jwks.find(kid))
            .or_else(|| jwks.keys.first())
            .ok_or_else(|| ClientError::InvalidAccessToken("no matching JWK".to_string()))?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| ClientError::InvalidAccessToken(format!("unusable JWK: {e}")))?;
        Ok((key, header.alg))
    }

    async fn decode_valid(&self, token: &str) -> Result<AccessClaims> {
        let (key, alg) = self.decoding_key_for(token).await?;
        let mut validation = Validation::new(alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        // The audience is surfaced to the caller rather than pinned here;
        // resource servers compare it against their own identity.
        validation.validate_aud = false;

        let decoded = jsonwebtoken::decode::<AccessClaims>(token, &key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ClientError::InvalidAccessToken("expired".to_string())
                }
                other => ClientError::InvalidAccessToken(format!("{other:?}")),
            })?;
        Ok(decoded.claims)
    }

    fn is_expired_error(err: &ClientError) -> bool {
        matches!(err, ClientError::InvalidAccessToken(reason) if reason == "expired")
    }

    /// Verify an access token against the subject schema.
    ///
    /// On expiry with a refresh token in `opts`, rotates and re-verifies
    /// transparently; the result then carries the fresh pair so callers
    /// can update their storage.
    pub async fn verify(
        &self,
        subjects: &SubjectSchema,
        token: &str,
        opts: VerifyOptions,
    ) -> Result<VerifyResult> {
        match self.decode_valid(token).await {
            Ok(claims) => self.finish_verify(subjects, claims, None),
            Err(err) if Self::is_expired_error(&err) => {
                let Some(refresh) = opts.refresh.as_deref() else {
                    return Err(err);
                };
                debug!("access token expired; attempting transparent refresh");
                let tokens = self
                    .refresh(refresh, None)
                    .await?
                    .ok_or(ClientError::InvalidRefreshToken)?;
                let claims = self.decode_valid(&tokens.access).await?;
                self.finish_verify(subjects, claims, Some(tokens))
            }
            Err(err) => Err(err),
        }
    }

    fn finish_verify(
        &self,
        subjects: &SubjectSchema,
        claims: AccessClaims,
        tokens: Option<Tokens>,
    ) -> Result<VerifyResult> {
        if !claims.is_access() {
            warn!(mode = %claims.mode, "token mode is not access");
            return Err(ClientError::InvalidAccessToken(format!(
                "token mode {:?} is not access",
                claims.mode
            )));
        }
        subjects
            .validate(&claims.subject_type, &claims.properties)
            .map_err(|e| ClientError::InvalidSubject(e.to_string()))?;

        Ok(VerifyResult {
            subject: Subject {
                subject_type: claims.subject_type,
                properties: claims.properties,
            },
            subject_id: claims.sub,
            aud: claims.aud,
            tokens,
        })
    }
}
