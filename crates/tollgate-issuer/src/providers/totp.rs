//! TOTP provider: enrollment, 6-digit token login, and backup-code
//! recovery.
//!
//! Secrets are 160-bit, base32-encoded, delivered once as an
//! `otpauth://` URL. Token validation accepts +/- `window` periods of
//! drift; backup codes are one-shot and removed on use. Every comparison
//! is timing-safe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::{Form, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use totp_lite::{totp_custom, Sha1};
use tracing::info;

use tollgate_core::random::{secure_bytes, timing_safe_eq, with_min_duration};
use tollgate_storage::StorageExt;

use crate::provider::{AuthProvider, ProviderContext, SuccessOptions};

const SECRET_BYTES: usize = 20;
const BACKUP_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Configuration for [`TotpProvider`].
#[derive(Debug, Clone)]
pub struct TotpProviderConfig {
    /// Issuer name shown in authenticator apps
    pub issuer: String,
    /// Token digits (default 6)
    pub digits: u32,
    /// Time step in seconds (default 30)
    pub period: u64,
    /// Accepted drift in periods either side of now (default 1)
    pub window: i64,
    /// Backup codes issued at enrollment (default 8)
    pub backup_codes: usize,
}

impl TotpProviderConfig {
    /// Defaults for `issuer`.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            digits: 6,
            period: 30,
            window: 1,
            backup_codes: 8,
        }
    }
}

/// Stored enrollment record at `totp/user/<email>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TotpRecord {
    secret: String,
    enabled: bool,
    backup_codes: Vec<String>,
    label: String,
}

/// The TOTP provider.
#[derive(Debug)]
pub struct TotpProvider {
    config: Arc<TotpProviderConfig>,
}

impl TotpProvider {
    #[allow(missing_docs)]
    pub fn new(config: TotpProviderConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[derive(Clone)]
struct TotpState {
    ctx: ProviderContext,
    config: Arc<TotpProviderConfig>,
}

impl AuthProvider for TotpProvider {
    fn kind(&self) -> &'static str {
        "totp"
    }

    fn routes(&self, ctx: ProviderContext) -> Router {
        let state = TotpState {
            ctx,
            config: self.config.clone(),
        };
        Router::new()
            .route("/register", post(register_post))
            .route("/authorize", post(authorize_post))
            .route("/recovery", post(recovery_post))
            .with_state(state)
    }
}

fn backup_code() -> String {
    // Rejection sampling over the 36-character alphabet keeps every
    // character equiprobable (252 = 36 * 7).
    let mut chars = Vec::with_capacity(8);
    while chars.len() < 8 {
        for byte in secure_bytes(16) {
            if byte < 252 {
                chars.push(BACKUP_CHARSET[(byte % 36) as usize] as char);
                if chars.len() == 8 {
                    break;
                }
            }
        }
    }
    format!(
        "{}-{}",
        chars[..4].iter().collect::<String>(),
        chars[4..].iter().collect::<String>()
    )
}

fn otpauth_url(config: &TotpProviderConfig, email: &str, secret: &str) -> String {
    let label: String =
        url::form_urlencoded::byte_serialize(format!("{}:{email}", config.issuer).as_bytes())
            .collect();
    let issuer: String =
        url::form_urlencoded::byte_serialize(config.issuer.as_bytes()).collect();
    format!(
        "otpauth://totp/{label}?secret={secret}&issuer={issuer}&digits={}&period={}",
        config.digits, config.period
    )
}

fn token_matches(config: &TotpProviderConfig, secret_b32: &str, token: &str) -> bool {
    let Some(secret) = base32::decode(base32::Alphabet::RFC4648 { padding: false }, secret_b32)
    else {
        return false;
    };
    let now = Utc::now().timestamp();
    let mut ok = false;
    // Evaluate every window slot; no early exit.
    for offset in -config.window..=config.window {
        let at = now + offset * config.period as i64;
        if at < 0 {
            continue;
        }
        let expected = totp_custom::<Sha1>(config.period, config.digits, &secret, at as u64);
        ok |= timing_safe_eq(token, &expected);
    }
    ok
}

fn email_of(form: &HashMap<String, String>) -> Option<String> {
    form.get("email")
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
}

async fn register_post(
    State(state): State<TotpState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let Some(email) = email_of(&form) else {
        return Json(json!({"error": "email is required"})).into_response();
    };
    let row = match state.ctx.key(["totp", "user", &email]) {
        Ok(row) => row,
        Err(err) => return state.ctx.fail(&headers, err).await,
    };

    match state.ctx.storage().get_json::<TotpRecord>(&row).await {
        Ok(Some(record)) if record.enabled => {
            return Json(json!({"error": "already_enrolled"})).into_response();
        }
        Ok(_) => {}
        Err(err) => return state.ctx.fail(&headers, err.into()).await,
    }

    let secret = base32::encode(
        base32::Alphabet::RFC4648 { padding: false },
        &secure_bytes(SECRET_BYTES),
    );
    let backup_codes: Vec<String> = (0..state.config.backup_codes).map(|_| backup_code()).collect();
    let record = TotpRecord {
        secret: secret.clone(),
        enabled: false,
        backup_codes: backup_codes.clone(),
        label: email.clone(),
    };
    if let Err(err) = state.ctx.storage().set_json(&row, &record, None).await {
        return state.ctx.fail(&headers, err.into()).await;
    }
    info!(email = %email, "totp enrollment started");

    Json(json!({
        "secret": secret,
        "url": otpauth_url(&state.config, &email, &secret),
        "backup_codes": backup_codes,
    }))
    .into_response()
}

async fn authorize_post(
    State(state): State<TotpState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let (Some(email), Some(token)) = (email_of(&form), form.get("token").cloned()) else {
        return Json(json!({"error": "email and token are required"})).into_response();
    };
    let row = match state.ctx.key(["totp", "user", &email]) {
        Ok(row) => row,
        Err(err) => return state.ctx.fail(&headers, err).await,
    };
    let record: Option<TotpRecord> = match state.ctx.storage().get_json(&row).await {
        Ok(record) => record,
        Err(err) => return state.ctx.fail(&headers, err.into()).await,
    };

    let config = state.config.clone();
    let ok = with_min_duration(Duration::from_millis(50), 20, async {
        match &record {
            Some(record) => token_matches(&config, &record.secret, &token),
            None => {
                // Burn a comparable amount of work for unknown emails.
                let _ = token_matches(&config, "GEZDGNBVGY3TQOJQ", &token);
                false
            }
        }
    })
    .await;

    if !ok {
        return Json(json!({"error": "invalid_token"})).into_response();
    }

    // First successful token completes enrollment.
    if let Some(mut record) = record {
        if !record.enabled {
            record.enabled = true;
            if let Err(err) = state.ctx.storage().set_json(&row, &record, None).await {
                return state.ctx.fail(&headers, err.into()).await;
            }
            info!(email = %email, "totp enrollment confirmed");
        }
    }

    let session = state.ctx.session(&headers).await;
    match state
        .ctx
        .success(&headers, json!({ "email": email }), SuccessOptions::default())
        .await
    {
        Ok(response) => state.ctx.forward(&headers, session, response).await,
        Err(err) => state.ctx.fail(&headers, err).await,
    }
}

async fn recovery_post(
    State(state): State<TotpState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let (Some(email), Some(code)) = (email_of(&form), form.get("code").cloned()) else {
        return Json(json!({"error": "email and code are required"})).into_response();
    };
    let row = match state.ctx.key(["totp", "user", &email]) {
        Ok(row) => row,
        Err(err) => return state.ctx.fail(&headers, err).await,
    };
    let record: Option<TotpRecord> = match state.ctx.storage().get_json(&row).await {
        Ok(record) => record,
        Err(err) => return state.ctx.fail(&headers, err.into()).await,
    };

    let code = code.trim().to_ascii_uppercase();
    let matched = with_min_duration(Duration::from_millis(50), 20, async {
        match &record {
            Some(record) => {
                let mut matched = None;
                for (index, backup) in record.backup_codes.iter().enumerate() {
                    if timing_safe_eq(&code, backup) {
                        matched = Some(index);
                    }
                }
                matched
            }
            None => {
                let _ = timing_safe_eq(&code, "XXXX-XXXX");
                None
            }
        }
    })
    .await;

    let (Some(mut record), Some(index)) = (record, matched) else {
        return Json(json!({"error": "invalid_code"})).into_response();
    };

    // One-shot: the used code disappears.
    record.backup_codes.remove(index);
    if let Err(err) = state.ctx.storage().set_json(&row, &record, None).await {
        return state.ctx.fail(&headers, err.into()).await;
    }
    info!(email = %email, remaining = record.backup_codes.len(), "backup code consumed");

    let session = state.ctx.session(&headers).await;
    match state
        .ctx
        .success(&headers, json!({ "email": email }), SuccessOptions::default())
        .await
    {
        Ok(response) => state.ctx.forward(&headers, session, response).await,
        Err(err) => state.ctx.fail(&headers, err).await,
    }
}
