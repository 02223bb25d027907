//! One-time-code provider: deliver an N-digit code, verify it.
//!
//! State machine: `start` -> `code{code, claims}`. Delivery goes through
//! the host's `send_code` callback (email, SMS, carrier pigeon - the
//! provider does not care); verification is timing-normalized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::{Form, Router};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use tollgate_core::random::{random_digits, timing_safe_eq, with_min_duration};

use crate::provider::{AuthProvider, ProviderContext, SuccessOptions};
use crate::providers::claims_from_form;

/// Delivery callback: `(claims, code)`; an `Err` message is shown inline.
pub type SendCode =
    Arc<dyn Fn(Value, String) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Renderer for the provider's two screens.
pub type CodeRenderer = Arc<dyn Fn(&CodeUi) -> Response + Send + Sync>;

/// What the renderer is asked to draw.
#[derive(Debug, Clone)]
pub enum CodeUi {
    /// Claim-collection screen
    Start {
        /// Inline error from the previous attempt
        error: Option<String>,
    },
    /// Code-entry screen
    Prompt {
        /// Claims the code was sent for
        claims: Value,
        /// True when this render follows a resend
        resend: bool,
        /// Inline error (`invalid_code`)
        error: Option<String>,
    },
}

/// Configuration for [`CodeProvider`].
#[derive(Clone)]
pub struct CodeProviderConfig {
    /// Digits in the generated code
    pub length: usize,
    /// Delivery callback
    pub send_code: SendCode,
    /// Custom UI renderer; defaults to JSON state dumps
    pub render: Option<CodeRenderer>,
}

impl std::fmt::Debug for CodeProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeProviderConfig")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// The code provider.
#[derive(Debug)]
pub struct CodeProvider {
    config: Arc<CodeProviderConfig>,
}

impl CodeProvider {
    /// Create a provider with the default 6-digit codes.
    pub fn new(send_code: SendCode) -> Self {
        Self {
            config: Arc::new(CodeProviderConfig {
                length: 6,
                send_code,
                render: None,
            }),
        }
    }

    /// Create a provider from a full configuration.
    pub fn from_config(config: CodeProviderConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

/// Pending state parked in the provider cookie once a code is out.
#[derive(Debug, Serialize, Deserialize)]
struct PendingCode {
    code: String,
    claims: Value,
}

#[derive(Clone)]
struct CodeState {
    ctx: ProviderContext,
    config: Arc<CodeProviderConfig>,
}

impl AuthProvider for CodeProvider {
    fn kind(&self) -> &'static str {
        "code"
    }

    fn routes(&self, ctx: ProviderContext) -> Router {
        let state = CodeState {
            ctx,
            config: self.config.clone(),
        };
        Router::new()
            .route("/authorize", get(authorize_get).post(authorize_post))
            .with_state(state)
    }
}

fn render(config: &CodeProviderConfig, ui: &CodeUi) -> Response {
    if let Some(renderer) = &config.render {
        return renderer(ui);
    }
    match ui {
        CodeUi::Start { error } => Json(json!({"step": "start", "error": error})).into_response(),
        CodeUi::Prompt { claims, resend, error } => Json(json!({
            "step": "code",
            "claims": claims,
            "resend": resend,
            "error": error,
        }))
        .into_response(),
    }
}

async fn authorize_get(State(state): State<CodeState>, headers: HeaderMap) -> Response {
    let session = state.ctx.session(&headers).await;
    let response = render(&state.config, &CodeUi::Start { error: None });
    state.ctx.forward(&headers, session, response).await
}

async fn authorize_post(
    State(state): State<CodeState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut session = state.ctx.session(&headers).await;
    let action = form.get("action").map(String::as_str).unwrap_or("request");

    match action {
        "request" | "resend" => {
            let resend = action == "resend";
            // On resend, keep the claims the code was originally sent for.
            let claims = if resend {
                match session.get::<PendingCode>("state") {
                    Some(pending) => pending.claims,
                    None => claims_from_form(&form, &["action", "code"]),
                }
            } else {
                claims_from_form(&form, &["action", "code"])
            };

            let code = random_digits(state.config.length);
            if let Err(message) = (state.config.send_code)(claims.clone(), code.clone()).await {
                warn!(provider = state.ctx.name(), error = %message, "code delivery failed");
                let response = render(&state.config, &CodeUi::Start { error: Some(message) });
                return state.ctx.forward(&headers, session, response).await;
            }

            if session
                .set("state", 600, &PendingCode { code, claims: claims.clone() })
                .is_err()
            {
                let response = render(
                    &state.config,
                    &CodeUi::Start { error: Some("could not persist flow state".into()) },
                );
                return state.ctx.forward(&headers, session, response).await;
            }
            let response = render(&state.config, &CodeUi::Prompt { claims, resend, error: None });
            state.ctx.forward(&headers, session, response).await
        }
        "verify" => {
            let Some(PendingCode { code, claims }) = session.get("state") else {
                let response = render(
                    &state.config,
                    &CodeUi::Start { error: Some("no pending code".into()) },
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
                    &CodeUi::Prompt { claims, resend: false, error: Some("invalid_code".into()) },
                );
                return state.ctx.forward(&headers, session, response).await;
            }

            session.clear();
            match state
                .ctx
                .success(&headers, claims, SuccessOptions::default())
                .await
            {
                Ok(response) => state.ctx.forward(&headers, session, response).await,
                Err(err) => state.ctx.fail(&headers, err).await,
            }
        }
        other => {
            let response = render(
                &state.config,
                &CodeUi::Start { error: Some(format!("unknown action {other:?}")) },
            );
            state.ctx.forward(&headers, session, response).await
        }
    }
}
