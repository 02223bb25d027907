//! Passkey (WebAuthn) provider.
//!
//! Four endpoints: registration ceremony start/finish and authentication
//! ceremony start/finish. Ceremony state lives in storage under the user's
//! `options` row (one in-flight challenge per user); verified credentials
//! are persisted with their signature counter and updated after every
//! assertion.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use webauthn_rs::prelude::{
    CreationChallengeResponse, CredentialID, Passkey, PasskeyAuthentication,
    PasskeyRegistration, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse, Url, Uuid, Webauthn, WebauthnBuilder,
};

use tollgate_core::{AuthError, Result};
use tollgate_storage::{StorageExt, StorageKey};

use crate::provider::{AuthProvider, ProviderContext, SuccessOptions};

const OPTIONS_TTL_SECS: u64 = 600;

/// Configuration for [`PasskeyProvider`].
#[derive(Debug, Clone)]
pub struct PasskeyProviderConfig {
    /// Relying-party id: the effective domain (e.g. `example.com`)
    pub rp_id: String,
    /// Origin browsers will report (e.g. `https://app.example.com`)
    pub rp_origin: String,
    /// Human-readable relying-party name
    pub rp_name: String,
}

/// The passkey provider.
pub struct PasskeyProvider {
    webauthn: Arc<Webauthn>,
}

impl std::fmt::Debug for PasskeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasskeyProvider").finish_non_exhaustive()
    }
}

impl PasskeyProvider {
    /// Build the provider; fails when the relying-party configuration is
    /// not a valid origin/id pair.
    pub fn new(config: PasskeyProviderConfig) -> Result<Self> {
        let origin = Url::parse(&config.rp_origin)
            .map_err(|e| AuthError::Crypto(format!("invalid rp origin: {e}")))?;
        let webauthn = WebauthnBuilder::new(&config.rp_id, &origin)
            .map_err(|e| AuthError::Crypto(format!("webauthn config: {e}")))?
            .rp_name(&config.rp_name)
            .build()
            .map_err(|e| AuthError::Crypto(format!("webauthn build: {e}")))?;
        Ok(Self {
            webauthn: Arc::new(webauthn),
        })
    }
}

/// Stored user record at `passkey/user/<userId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PasskeyUser {
    id: String,
    username: String,
}

/// The single in-flight ceremony for a user.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum ChallengeState {
    Registration {
        username: String,
        state: PasskeyRegistration,
    },
    Authentication {
        username: String,
        state: PasskeyAuthentication,
    },
}

#[derive(Clone)]
struct PkState {
    ctx: ProviderContext,
    webauthn: Arc<Webauthn>,
}

impl AuthProvider for PasskeyProvider {
    fn kind(&self) -> &'static str {
        "passkey"
    }

    fn routes(&self, ctx: ProviderContext) -> Router {
        let state = PkState {
            ctx,
            webauthn: self.webauthn.clone(),
        };
        Router::new()
            .route("/register-request", get(register_request))
            .route("/register-verify", post(register_verify))
            .route("/authenticate-options", get(authenticate_options))
            .route("/authenticate-verify", post(authenticate_verify))
            .with_state(state)
    }
}

/// Deterministic user id: UUID built from the username digest, so lookups
/// need no secondary index.
fn user_id(username: &str) -> Uuid {
    let digest = Sha256::digest(username.to_ascii_lowercase().as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn user_key(uid: &str) -> Result<StorageKey> {
    Ok(StorageKey::new(["passkey", "user", uid])?)
}

fn credential_key(uid: &str, cred_id: &str) -> Result<StorageKey> {
    Ok(StorageKey::new([
        "passkey", "user", uid, "credential", cred_id, "passkey",
    ])?)
}

fn list_key(uid: &str) -> Result<StorageKey> {
    Ok(StorageKey::new(["passkey", "user", uid, "passkeys"])?)
}

fn options_key(uid: &str) -> Result<StorageKey> {
    Ok(StorageKey::new(["passkey", "user", uid, "options"])?)
}

fn encode_cred_id(id: &CredentialID) -> String {
    URL_SAFE_NO_PAD.encode(id.as_ref())
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

async fn load_passkeys(state: &PkState, uid: &str) -> Result<Vec<Passkey>> {
    let ids: Vec<String> = state
        .ctx
        .storage()
        .get_json(&list_key(uid)?)
        .await?
        .unwrap_or_default();
    let mut passkeys = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(passkey) = state
            .ctx
            .storage()
            .get_json::<Passkey>(&credential_key(uid, id)?)
            .await?
        {
            passkeys.push(passkey);
        }
    }
    Ok(passkeys)
}

async fn register_request(
    State(state): State<PkState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(username) = query.get("username").map(|u| u.trim().to_string()).filter(|u| !u.is_empty())
    else {
        return bad_request("username is required");
    };
    let uuid = user_id(&username);
    let uid = uuid.to_string();

    let result: Result<CreationChallengeResponse> = async {
        let existing = load_passkeys(&state, &uid).await?;
        let exclude: Option<Vec<CredentialID>> = if existing.is_empty() {
            None
        } else {
            Some(existing.iter().map(|p| p.cred_id().clone()).collect())
        };

        let (ccr, reg_state) = state
            .webauthn
            .start_passkey_registration(uuid, &username, &username, exclude)
            .map_err(|e| AuthError::Crypto(format!("registration start: {e}")))?;

        let storage = state.ctx.storage();
        storage
            .set_json(
                &user_key(&uid)?,
                &PasskeyUser { id: uid.clone(), username: username.clone() },
                None,
            )
            .await?;
        storage
            .set_json(
                &options_key(&uid)?,
                &ChallengeState::Registration { username: username.clone(), state: reg_state },
                Some(OPTIONS_TTL_SECS),
            )
            .await?;
        Ok(ccr)
    }
    .await;

    match result {
        Ok(ccr) => Json(ccr).into_response(),
        Err(err) => state.ctx.fail(&headers, err).await,
    }
}

#[derive(Debug, Deserialize)]
struct RegisterVerifyBody {
    username: String,
    credential: RegisterPublicKeyCredential,
}

async fn register_verify(
    State(state): State<PkState>,
    headers: HeaderMap,
    Json(body): Json<RegisterVerifyBody>,
) -> Response {
    let uid = user_id(&body.username).to_string();

    let result: Result<Option<String>> = async {
        let options = state
            .ctx
            .storage()
            .take(&options_key(&uid)?)
            .await?
            .map(serde_json::from_value::<ChallengeState>)
            .transpose()?;
        let Some(ChallengeState::Registration { state: reg_state, .. }) = options else {
            return Ok(None);
        };

        let passkey = match state
            .webauthn
            .finish_passkey_registration(&body.credential, &reg_state)
        {
            Ok(passkey) => passkey,
            Err(err) => {
                warn!(error = %err, "passkey registration rejected");
                return Ok(None);
            }
        };

        let cred_id = encode_cred_id(passkey.cred_id());
        let storage = state.ctx.storage();
        storage
            .set_json(&credential_key(&uid, &cred_id)?, &passkey, None)
            .await?;
        let mut ids: Vec<String> = storage
            .get_json(&list_key(&uid)?)
            .await?
            .unwrap_or_default();
        if !ids.contains(&cred_id) {
            ids.push(cred_id.clone());
            storage.set_json(&list_key(&uid)?, &ids, None).await?;
        }
        info!(username = %body.username, "passkey registered");
        Ok(Some(cred_id))
    }
    .await;

    match result {
        Ok(Some(cred_id)) => Json(json!({"verified": true, "credential_id": cred_id})).into_response(),
        Ok(None) => bad_request("registration could not be verified"),
        Err(err) => state.ctx.fail(&headers, err).await,
    }
}

async fn authenticate_options(
    State(state): State<PkState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(username) = query.get("username").map(|u| u.trim().to_string()).filter(|u| !u.is_empty())
    else {
        return bad_request("username is required");
    };
    let uid = user_id(&username).to_string();

    let result: Result<Option<RequestChallengeResponse>> = async {
        let passkeys = load_passkeys(&state, &uid).await?;
        if passkeys.is_empty() {
            return Ok(None);
        }
        let (rcr, auth_state) = state
            .webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(|e| AuthError::Crypto(format!("authentication start: {e}")))?;
        state
            .ctx
            .storage()
            .set_json(
                &options_key(&uid)?,
                &ChallengeState::Authentication { username: username.clone(), state: auth_state },
                Some(OPTIONS_TTL_SECS),
            )
            .await?;
        Ok(Some(rcr))
    }
    .await;

    match result {
        Ok(Some(rcr)) => Json(rcr).into_response(),
        Ok(None) => bad_request("no passkeys registered for this user"),
        Err(err) => state.ctx.fail(&headers, err).await,
    }
}

#[derive(Debug, Deserialize)]
struct AuthenticateVerifyBody {
    username: String,
    credential: PublicKeyCredential,
}

async fn authenticate_verify(
    State(state): State<PkState>,
    headers: HeaderMap,
    Json(body): Json<AuthenticateVerifyBody>,
) -> Response {
    let uid = user_id(&body.username).to_string();

    let verified: Result<bool> = async {
        let options = state
            .ctx
            .storage()
            .take(&options_key(&uid)?)
            .await?
            .map(serde_json::from_value::<ChallengeState>)
            .transpose()?;
        let Some(ChallengeState::Authentication { state: auth_state, .. }) = options else {
            return Ok(false);
        };

        let auth_result = match state
            .webauthn
            .finish_passkey_authentication(&body.credential, &auth_state)
        {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "passkey assertion rejected");
                return Ok(false);
            }
        };

        // Persist the monotonically increasing signature counter.
        let cred_id = encode_cred_id(auth_result.cred_id());
        let row = credential_key(&uid, &cred_id)?;
        if let Some(mut passkey) = state.ctx.storage().get_json::<Passkey>(&row).await? {
            if passkey.update_credential(&auth_result) == Some(true) {
                state.ctx.storage().set_json(&row, &passkey, None).await?;
            }
        }
        Ok(true)
    }
    .await;

    match verified {
        Ok(true) => {
            let session = state.ctx.session(&headers).await;
            match state
                .ctx
                .success(
                    &headers,
                    json!({ "username": body.username, "userId": uid }),
                    SuccessOptions::default(),
                )
                .await
            {
                Ok(response) => state.ctx.forward(&headers, session, response).await,
                Err(err) => state.ctx.fail(&headers, err).await,
            }
        }
        Ok(false) => bad_request("assertion could not be verified"),
        Err(err) => state.ctx.fail(&headers, err).await,
    }
}
