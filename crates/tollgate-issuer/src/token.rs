//! Access-JWT minting, refresh-token issuance, and rotation.
//!
//! Refresh tokens travel as `<subject>:<opaque>` and are rotated on every
//! use. The successor opaque token is reserved when the row is written, so
//! concurrent rotations inside the reuse window all return the same
//! successor; a rotation after the window is treated as theft and wipes
//! every refresh row under the subject.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use jsonwebtoken::{Algorithm, Header};
use serde_json::Value;
use tracing::{debug, warn};

use tollgate_core::{
    random::default_token, AccessClaims, AuthError, KeyManager, OauthError, OauthErrorCode,
    Result, RevocationLedger,
};
use tollgate_storage::{Storage, StorageExt, StorageKey};

use crate::state::{RefreshPayload, TokenTtl, TtlConfig};

/// Storage namespace for refresh rows.
pub const REFRESH_PREFIX: &str = "oauth:refresh";
/// Storage namespace for authorization codes.
pub const CODE_PREFIX: &str = "oauth:code";

/// Fields a refresh callback may replace on the stored payload.
#[derive(Debug, Clone)]
pub struct RefreshUpdate {
    #[allow(missing_docs)]
    pub subject_type: String,
    #[allow(missing_docs)]
    pub properties: Value,
    /// Replacement subject string, when the principal migrated
    pub subject: Option<String>,
    #[allow(missing_docs)]
    pub scopes: Option<Vec<String>>,
}

/// Host-supplied refresh callback.
///
/// `Ok(None)` invalidates the subject and fails the grant; `Err` becomes a
/// 500 `server_error`.
pub type RefreshHook = Arc<
    dyn Fn(RefreshPayload) -> BoxFuture<'static, std::result::Result<Option<RefreshUpdate>, String>>
        + Send
        + Sync,
>;

/// A freshly issued token pair.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    /// Signed access JWT
    pub access: String,
    /// `<subject>:<opaque>` refresh token
    pub refresh: String,
    /// Access-token lifetime in seconds
    pub expires_in: u64,
}

/// Sign an access JWT for `subject`.
pub(crate) async fn mint_access(
    keys: &KeyManager,
    issuer: &str,
    client_id: &str,
    subject_type: &str,
    properties: &Value,
    subject: &str,
    ttl_access: u64,
) -> Result<String> {
    let aud = client_id.trim();
    if aud.is_empty() {
        return Err(AuthError::Oauth(OauthError::new(
            OauthErrorCode::InvalidClient,
            "audience must not be empty",
        )));
    }

    let key = keys.signing_key().await?;
    let iat = Utc::now().timestamp();
    let claims = AccessClaims {
        mode: "access".to_string(),
        subject_type: subject_type.to_string(),
        properties: properties.clone(),
        sub: subject.to_string(),
        aud: aud.to_string(),
        iss: issuer.to_string(),
        iat,
        exp: iat + ttl_access as i64,
    };
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(key.id.clone());
    header.typ = Some("JWT".to_string());

    jsonwebtoken::encode(&header, &claims, key.encoding_key())
        .map_err(|e| AuthError::Crypto(format!("jwt signing: {e}")))
}

fn refresh_key(subject: &str, opaque: &str) -> Result<StorageKey> {
    Ok(StorageKey::new([REFRESH_PREFIX, subject, opaque])?)
}

/// Issue a brand-new token pair for `subject` (code exchange or implicit
/// flow). The refresh row carries a pre-reserved successor token.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn issue_tokens(
    storage: &Arc<dyn Storage>,
    keys: &KeyManager,
    issuer: &str,
    client_id: &str,
    subject_type: &str,
    properties: &Value,
    subject: &str,
    ttl: TokenTtl,
    scopes: Option<Vec<String>>,
) -> Result<IssuedTokens> {
    let opaque = default_token();
    let payload = RefreshPayload {
        subject_type: subject_type.to_string(),
        properties: properties.clone(),
        client_id: client_id.to_string(),
        subject: subject.to_string(),
        ttl,
        next_token: default_token(),
        time_used: None,
        scopes,
    };
    storage
        .set_json(&refresh_key(subject, &opaque)?, &payload, Some(ttl.refresh))
        .await?;

    let access = mint_access(
        keys,
        issuer,
        client_id,
        subject_type,
        properties,
        subject,
        ttl.access,
    )
    .await?;
    debug!(subject = %subject, client_id = %client_id, "issued token pair");
    Ok(IssuedTokens {
        access,
        refresh: format!("{subject}:{opaque}"),
        expires_in: ttl.access,
    })
}

/// Remove every refresh row stored under `subject`.
pub(crate) async fn invalidate_subject(storage: &Arc<dyn Storage>, subject: &str) -> Result<()> {
    let prefix = StorageKey::new([REFRESH_PREFIX, subject])?;
    let rows = storage.scan(&prefix).await?;
    let count = rows.len();
    for (key, _) in rows {
        storage.remove(&key).await?;
    }
    debug!(subject = %subject, count, "invalidated refresh tokens");
    Ok(())
}

/// Rotate a refresh token presented at `/token`.
///
/// Grant failures come back as [`AuthError::Oauth`] with `invalid_grant`;
/// refresh-hook crashes as `server_error`.
pub(crate) async fn refresh_grant(
    storage: &Arc<dyn Storage>,
    keys: &KeyManager,
    revocation: &RevocationLedger,
    hook: Option<&RefreshHook>,
    ttl: &TtlConfig,
    issuer: &str,
    wire_token: &str,
) -> Result<IssuedTokens> {
    let Some((wire_subject, opaque)) = wire_token.rsplit_once(':') else {
        return Err(OauthError::invalid_grant("refresh token is malformed").into());
    };

    if revocation.is_revoked(wire_token).await? {
        return Err(OauthError::invalid_grant("refresh token has been revoked").into());
    }

    let row = refresh_key(wire_subject, opaque)?;
    let Some(mut payload) = storage.get_json::<RefreshPayload>(&row).await? else {
        return Err(OauthError::invalid_grant("refresh token is invalid").into());
    };

    if let Some(hook) = hook {
        match hook(payload.clone()).await {
            Err(message) => {
                warn!(error = %message, "refresh callback crashed");
                return Err(OauthError::server_error(message).into());
            }
            Ok(None) => {
                invalidate_subject(storage, &payload.subject).await?;
                return Err(OauthError::invalid_grant("refresh rejected").into());
            }
            Ok(Some(update)) => {
                payload.subject_type = update.subject_type;
                payload.properties = update.properties;
                if let Some(subject) = update.subject {
                    payload.subject = subject;
                }
                if let Some(scopes) = update.scopes {
                    payload.scopes = Some(scopes);
                }
            }
        }
    }

    let now = Utc::now().timestamp_millis();
    let generate_refresh = payload.time_used.is_none();

    if ttl.reuse <= 0 {
        // Strict single-use: burn the row before anything else happens.
        storage.remove(&row).await?;
    } else if let Some(time_used) = payload.time_used {
        if now > time_used + ttl.reuse * 1000 {
            warn!(
                subject = %payload.subject,
                "refresh token reused past the reuse window; invalidating subject"
            );
            invalidate_subject(storage, &payload.subject).await?;
            return Err(OauthError::invalid_grant("refresh token reuse detected").into());
        }
        // Retry inside the reuse window: hand back the reserved successor.
    } else {
        payload.time_used = Some(now);
        let stub_ttl = (ttl.reuse + ttl.retention).max(1) as u64;
        storage.set_json(&row, &payload, Some(stub_ttl)).await?;
    }

    let next_opaque = payload.next_token.clone();
    if generate_refresh {
        let successor = RefreshPayload {
            subject_type: payload.subject_type.clone(),
            properties: payload.properties.clone(),
            client_id: payload.client_id.clone(),
            subject: payload.subject.clone(),
            ttl: ttl.token_ttl(),
            next_token: default_token(),
            time_used: None,
            scopes: payload.scopes.clone(),
        };
        storage
            .set_json(
                &refresh_key(&payload.subject, &next_opaque)?,
                &successor,
                Some(ttl.refresh),
            )
            .await?;
    }

    let access = mint_access(
        keys,
        issuer,
        &payload.client_id,
        &payload.subject_type,
        &payload.properties,
        &payload.subject,
        ttl.access,
    )
    .await?;
    Ok(IssuedTokens {
        access,
        refresh: format!("{}:{}", payload.subject, next_opaque),
        expires_in: ttl.access,
    })
}
