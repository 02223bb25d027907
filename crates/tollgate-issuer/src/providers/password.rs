//! Password provider: login, registration, and password change.
//!
//! Passwords are hashed with scrypt (N=16384, r=8, p=1, 256-bit) by
//! default; PBKDF2-SHA-256 with 600k iterations is available where scrypt
//! is too slow. Registration and change both verify an emailed code before
//! touching the stored hash. Every email lookup is lower-cased, and login
//! records an `email -> subject` mapping so a later password change can
//! revoke all sessions for that email.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::{Form, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};

use tollgate_core::random::{random_digits, secure_bytes, timing_safe_eq, with_min_duration};
use tollgate_core::{AuthError, Result};
use tollgate_storage::StorageExt;

use crate::provider::{AuthProvider, ProviderContext, SuccessOptions};

const CODE_LENGTH: usize = 6;
const SALT_BYTES: usize = 16;
const HASH_BYTES: usize = 32;

/// Delivery callback for verification codes: `(email, code)`.
pub type SendCode =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, std::result::Result<(), String>> + Send + Sync>;

/// Password policy check; `Err(message)` rejects with `validation_error`.
pub type PasswordValidator =
    Arc<dyn Fn(String) -> BoxFuture<'static, std::result::Result<(), String>> + Send + Sync>;

/// Supported password hashing schemes.
#[derive(Debug, Clone, Copy)]
pub enum PasswordHasher {
    /// scrypt; `log_n` is the CPU/memory cost exponent (default 14)
    Scrypt {
        #[allow(missing_docs)]
        log_n: u8,
        #[allow(missing_docs)]
        r: u32,
        #[allow(missing_docs)]
        p: u32,
    },
    /// PBKDF2-HMAC-SHA-256
    Pbkdf2 {
        #[allow(missing_docs)]
        iterations: u32,
    },
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::Scrypt { log_n: 14, r: 8, p: 1 }
    }
}

impl PasswordHasher {
    /// The PBKDF2 alternative at its default strength.
    pub fn pbkdf2() -> Self {
        Self::Pbkdf2 { iterations: 600_000 }
    }
}

/// Persisted hash record: algorithm parameters travel with the hash so
/// verification works across configuration changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "camelCase")]
enum StoredPassword {
    #[serde(rename_all = "camelCase")]
    Scrypt {
        log_n: u8,
        r: u32,
        p: u32,
        salt: String,
        hash: String,
    },
    #[serde(rename_all = "camelCase")]
    Pbkdf2 {
        iterations: u32,
        salt: String,
        hash: String,
    },
}

fn hash_password(hasher: PasswordHasher, password: &str) -> Result<StoredPassword> {
    let salt = secure_bytes(SALT_BYTES);
    let mut out = vec![0u8; HASH_BYTES];
    match hasher {
        PasswordHasher::Scrypt { log_n, r, p } => {
            let params = scrypt::Params::new(log_n, r, p, HASH_BYTES)
                .map_err(|e| AuthError::Crypto(format!("scrypt params: {e}")))?;
            scrypt::scrypt(password.as_bytes(), &salt, &params, &mut out)
                .map_err(|e| AuthError::Crypto(format!("scrypt: {e}")))?;
            Ok(StoredPassword::Scrypt {
                log_n,
                r,
                p,
                salt: BASE64.encode(salt),
                hash: BASE64.encode(out),
            })
        }
        PasswordHasher::Pbkdf2 { iterations } => {
            pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut out);
            Ok(StoredPassword::Pbkdf2 {
                iterations,
                salt: BASE64.encode(salt),
                hash: BASE64.encode(out),
            })
        }
    }
}

fn verify_password(stored: &StoredPassword, password: &str) -> bool {
    let (salt, expected) = match stored {
        StoredPassword::Scrypt { salt, hash, .. } | StoredPassword::Pbkdf2 { salt, hash, .. } => {
            (salt, hash)
        }
    };
    let Ok(salt) = BASE64.decode(salt) else { return false };
    let Ok(expected) = BASE64.decode(expected) else { return false };

    let mut derived = vec![0u8; expected.len().max(1)];
    let ok = match stored {
        StoredPassword::Scrypt { log_n, r, p, .. } => {
            match scrypt::Params::new(*log_n, *r, *p, derived.len()) {
                Ok(params) => {
                    scrypt::scrypt(password.as_bytes(), &salt, &params, &mut derived).is_ok()
                }
                Err(_) => false,
            }
        }
        StoredPassword::Pbkdf2 { iterations, .. } => {
            pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, *iterations, &mut derived);
            true
        }
    };
    // Compare derived key bytes in constant time.
    ok && timing_safe_eq(&BASE64.encode(derived), &BASE64.encode(expected))
}

/// Configuration for [`PasswordProvider`].
#[derive(Clone)]
pub struct PasswordProviderConfig {
    /// Hashing scheme for newly stored passwords
    pub hasher: PasswordHasher,
    /// Verification-code delivery
    pub send_code: SendCode,
    /// Optional password policy
    pub validate: Option<PasswordValidator>,
    /// Custom UI renderer
    pub render: Option<Arc<dyn Fn(&PasswordUi) -> Response + Send + Sync>>,
}

impl std::fmt::Debug for PasswordProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordProviderConfig")
            .field("hasher", &self.hasher)
            .finish_non_exhaustive()
    }
}

/// Renderer states for the password screens.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum PasswordUi {
    #[allow(missing_docs)]
    Login { error: Option<String> },
    #[allow(missing_docs)]
    Register { error: Option<String> },
    /// Code-entry step of registration or change
    VerifyCode { email: String, error: Option<String> },
    /// New-password step of the change flow
    Update { email: String, error: Option<String> },
    /// Change-flow entry: collect the email
    Change { error: Option<String> },
    /// Password change finished
    Done {},
}

/// The password provider.
#[derive(Debug)]
pub struct PasswordProvider {
    config: Arc<PasswordProviderConfig>,
}

impl PasswordProvider {
    /// Create a provider with scrypt hashing and no password policy.
    pub fn new(send_code: SendCode) -> Self {
        Self::from_config(PasswordProviderConfig {
            hasher: PasswordHasher::default(),
            send_code,
            validate: None,
            render: None,
        })
    }

    #[allow(missing_docs)]
    pub fn from_config(config: PasswordProviderConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "camelCase")]
enum PendingState {
    #[serde(rename_all = "camelCase")]
    Register {
        email: String,
        code: String,
        password: StoredPassword,
    },
    #[serde(rename_all = "camelCase")]
    Change {
        email: String,
        code: String,
        verified: bool,
    },
}

#[derive(Clone)]
struct PwState {
    ctx: ProviderContext,
    config: Arc<PasswordProviderConfig>,
}

impl AuthProvider for PasswordProvider {
    fn kind(&self) -> &'static str {
        "password"
    }

    fn routes(&self, ctx: ProviderContext) -> Router {
        let state = PwState {
            ctx,
            config: self.config.clone(),
        };
        Router::new()
            .route("/authorize", get(login_get).post(login_post))
            .route("/register", get(register_get).post(register_post))
            .route("/change", get(change_get).post(change_post))
            .with_state(state)
    }
}

fn render(config: &PasswordProviderConfig, ui: &PasswordUi) -> Response {
    if let Some(renderer) = &config.render {
        return renderer(ui);
    }
    Json(json!(ui)).into_response()
}

async fn validate_policy(config: &PasswordProviderConfig, password: &str) -> Option<String> {
    match &config.validate {
        Some(validate) => validate(password.to_string()).await.err(),
        None => None,
    }
}

fn email_of(form: &HashMap<String, String>) -> Option<String> {
    form.get("email")
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
}

async fn login_get(State(state): State<PwState>, headers: HeaderMap) -> Response {
    let session = state.ctx.session(&headers).await;
    let response = render(&state.config, &PasswordUi::Login { error: None });
    state.ctx.forward(&headers, session, response).await
}

async fn login_post(
    State(state): State<PwState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let session = state.ctx.session(&headers).await;
    let (Some(email), Some(password)) = (email_of(&form), form.get("password")) else {
        let response = render(
            &state.config,
            &PasswordUi::Login { error: Some("email and password are required".into()) },
        );
        return state.ctx.forward(&headers, session, response).await;
    };

    let row = match state.ctx.key(["email", &email, "password"]) {
        Ok(row) => row,
        Err(err) => return state.ctx.fail(&headers, err).await,
    };
    let stored: Option<StoredPassword> = match state.ctx.storage().get_json(&row).await {
        Ok(stored) => stored,
        Err(err) => return state.ctx.fail(&headers, err.into()).await,
    };

    // Unknown emails still burn a full verification so they are not
    // distinguishable by latency.
    let hasher = state.config.hasher;
    let ok = with_min_duration(Duration::from_millis(50), 20, async {
        match &stored {
            Some(stored) => verify_password(stored, password),
            None => {
                let _ = hash_password(hasher, password);
                false
            }
        }
    })
    .await;

    if !ok {
        let response = render(
            &state.config,
            &PasswordUi::Login { error: Some("invalid_credentials".into()) },
        );
        return state.ctx.forward(&headers, session, response).await;
    }

    // Record email -> subject so /change can revoke sessions later.
    let subject_hook = {
        let storage = state.ctx.storage();
        let ctx = state.ctx.clone();
        let email = email.clone();
        Arc::new(move |subject: String| {
            let storage = storage.clone();
            let ctx = ctx.clone();
            let email = email.clone();
            Box::pin(async move {
                if let Ok(row) = ctx.key(["email", &email, "subject"]) {
                    if let Err(err) = storage.set_json(&row, &subject, None).await {
                        warn!(error = %err, "failed to record subject mapping");
                    }
                }
            }) as futures::future::BoxFuture<'static, ()>
        })
    };

    match state
        .ctx
        .success(
            &headers,
            json!({ "email": email }),
            SuccessOptions {
                on_subject: Some(subject_hook),
                ..SuccessOptions::default()
            },
        )
        .await
    {
        Ok(response) => state.ctx.forward(&headers, session, response).await,
        Err(err) => state.ctx.fail(&headers, err).await,
    }
}

async fn register_get(State(state): State<PwState>, headers: HeaderMap) -> Response {
    let session = state.ctx.session(&headers).await;
    let response = render(&state.config, &PasswordUi::Register { error: None });
    state.ctx.forward(&headers, session, response).await
}

async fn register_post(
    State(state): State<PwState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut session = state.ctx.session(&headers).await;
    let action = form.get("action").map(String::as_str).unwrap_or("register");

    match action {
        "register" => {
            let (Some(email), Some(password)) = (email_of(&form), form.get("password")) else {
                let response = render(
                    &state.config,
                    &PasswordUi::Register { error: Some("email and password are required".into()) },
                );
                return state.ctx.forward(&headers, session, response).await;
            };
            if let Some(message) = validate_policy(&state.config, password).await {
                let response =
                    render(&state.config, &PasswordUi::Register { error: Some(message) });
                return state.ctx.forward(&headers, session, response).await;
            }

            let hashed = match hash_password(state.config.hasher, password) {
                Ok(hashed) => hashed,
                Err(err) => return state.ctx.fail(&headers, err).await,
            };
            let code = random_digits(CODE_LENGTH);
            if let Err(message) = (state.config.send_code)(email.clone(), code.clone()).await {
                let response =
                    render(&state.config, &PasswordUi::Register { error: Some(message) });
                return state.ctx.forward(&headers, session, response).await;
            }
            if let Err(err) = session.set(
                "pending",
                600,
                &PendingState::Register { email: email.clone(), code, password: hashed },
            ) {
                return state.ctx.fail(&headers, err).await;
            }
            let response =
                render(&state.config, &PasswordUi::VerifyCode { email, error: None });
            state.ctx.forward(&headers, session, response).await
        }
        "verify" => {
            let Some(PendingState::Register { email, code, password }) = session.get("pending")
            else {
                let response = render(
                    &state.config,
                    &PasswordUi::Register { error: Some("no pending registration".into()) },
                );
                return state.ctx.forward(&headers, session, response).await;
            };
            let submitted = form.get("code").cloned().unwrap_or_default();
            let ok = with_min_duration(Duration::from_millis(50), 20, async {
                timing_safe_eq(&submitted, &code)
            })
            .await;
            if !ok {
                let response = render(
                    &state.config,
                    &PasswordUi::VerifyCode { email, error: Some("invalid_code".into()) },
                );
                return state.ctx.forward(&headers, session, response).await;
            }

            let row = match state.ctx.key(["email", &email, "password"]) {
                Ok(row) => row,
                Err(err) => return state.ctx.fail(&headers, err).await,
            };
            if let Err(err) = state.ctx.storage().set_json(&row, &password, None).await {
                return state.ctx.fail(&headers, err.into()).await;
            }
            info!(email = %email, "password registration completed");

            session.clear();
            match state
                .ctx
                .success(&headers, json!({ "email": email }), SuccessOptions::default())
                .await
            {
                Ok(response) => state.ctx.forward(&headers, session, response).await,
                Err(err) => state.ctx.fail(&headers, err).await,
            }
        }
        other => {
            let response = render(
                &state.config,
                &PasswordUi::Register { error: Some(format!("unknown action {other:?}")) },
            );
            state.ctx.forward(&headers, session, response).await
        }
    }
}

async fn change_get(State(state): State<PwState>, headers: HeaderMap) -> Response {
    let session = state.ctx.session(&headers).await;
    let response = render(&state.config, &PasswordUi::Change { error: None });
    state.ctx.forward(&headers, session, response).await
}

async fn change_post(
    State(state): State<PwState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut session = state.ctx.session(&headers).await;
    let action = form.get("action").map(String::as_str).unwrap_or("code");

    match action {
        "code" => {
            let Some(email) = email_of(&form) else {
                let response = render(
                    &state.config,
                    &PasswordUi::Change { error: Some("email is required".into()) },
                );
                return state.ctx.forward(&headers, session, response).await;
            };
            let code = random_digits(CODE_LENGTH);
            if let Err(message) = (state.config.send_code)(email.clone(), code.clone()).await {
                let response = render(&state.config, &PasswordUi::Change { error: Some(message) });
                return state.ctx.forward(&headers, session, response).await;
            }
            if let Err(err) = session.set(
                "pending",
                600,
                &PendingState::Change { email: email.clone(), code, verified: false },
            ) {
                return state.ctx.fail(&headers, err).await;
            }
            let response =
                render(&state.config, &PasswordUi::VerifyCode { email, error: None });
            state.ctx.forward(&headers, session, response).await
        }
        "verify" => {
            let Some(PendingState::Change { email, code, .. }) = session.get("pending") else {
                let response = render(
                    &state.config,
                    &PasswordUi::Change { error: Some("no pending change".into()) },
                );
                return state.ctx.forward(&headers, session, response).await;
            };
            let submitted = form.get("code").cloned().unwrap_or_default();
            let ok = with_min_duration(Duration::from_millis(50), 20, async {
                timing_safe_eq(&submitted, &code)
            })
            .await;
            if !ok {
                let response = render(
                    &state.config,
                    &PasswordUi::VerifyCode { email, error: Some("invalid_code".into()) },
                );
                return state.ctx.forward(&headers, session, response).await;
            }
            if let Err(err) = session.set(
                "pending",
                600,
                &PendingState::Change { email: email.clone(), code, verified: true },
            ) {
                return state.ctx.fail(&headers, err).await;
            }
            let response = render(&state.config, &PasswordUi::Update { email, error: None });
            state.ctx.forward(&headers, session, response).await
        }
        "update" => {
            let Some(PendingState::Change { email, verified: true, .. }) = session.get("pending")
            else {
                let response = render(
                    &state.config,
                    &PasswordUi::Change { error: Some("code not verified".into()) },
                );
                return state.ctx.forward(&headers, session, response).await;
            };
            let Some(password) = form.get("password") else {
                let response = render(
                    &state.config,
                    &PasswordUi::Update { email, error: Some("password is required".into()) },
                );
                return state.ctx.forward(&headers, session, response).await;
            };
            if let Some(message) = validate_policy(&state.config, password).await {
                let response =
                    render(&state.config, &PasswordUi::Update { email, error: Some(message) });
                return state.ctx.forward(&headers, session, response).await;
            }

            let hashed = match hash_password(state.config.hasher, password) {
                Ok(hashed) => hashed,
                Err(err) => return state.ctx.fail(&headers, err).await,
            };
            let row = match state.ctx.key(["email", &email, "password"]) {
                Ok(row) => row,
                Err(err) => return state.ctx.fail(&headers, err).await,
            };
            if let Err(err) = state.ctx.storage().set_json(&row, &hashed, None).await {
                return state.ctx.fail(&headers, err.into()).await;
            }

            // Revoke every session for this email, when login recorded one.
            if let Ok(subject_row) = state.ctx.key(["email", &email, "subject"]) {
                match state.ctx.storage().get_json::<String>(&subject_row).await {
                    Ok(Some(subject)) => {
                        if let Err(err) = state.ctx.invalidate(&subject).await {
                            warn!(error = %err, "failed to invalidate sessions after change");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "subject mapping lookup failed"),
                }
            }
            info!(email = %email, "password changed");

            session.clear();
            let response = render(&state.config, &PasswordUi::Done {});
            state.ctx.forward(&headers, session, response).await
        }
        other => {
            let response = render(
                &state.config,
                &PasswordUi::Change { error: Some(format!("unknown action {other:?}")) },
            );
            state.ctx.forward(&headers, session, response).await
        }
    }
}
