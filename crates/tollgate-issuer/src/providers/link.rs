//! Magic-link provider: email a single-use link, verify the click.
//!
//! State machine: `start` -> `sent{token, claims}`. The link carries the
//! token plus every claim; `/verify` checks them all against the session
//! cookie with constant-time comparison, so a forwarded link without the
//! browser cookie cannot complete the flow.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::{Form, Router};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use tollgate_core::random::{default_token, timing_safe_eq, with_min_duration};

use crate::provider::{AuthProvider, ProviderContext, SuccessOptions};
use crate::providers::claims_from_form;

/// Delivery callback: `(claims, verification_url)`.
pub type SendLink =
    Arc<dyn Fn(Value, String) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Renderer for the provider's screens.
pub type LinkRenderer = Arc<dyn Fn(&LinkUi) -> Response + Send + Sync>;

/// What the renderer is asked to draw.
#[derive(Debug, Clone)]
pub enum LinkUi {
    /// Claim-collection screen
    Start {
        #[allow(missing_docs)]
        error: Option<String>,
    },
    /// "Check your inbox" screen
    Sent {
        #[allow(missing_docs)]
        claims: Value,
        #[allow(missing_docs)]
        resend: bool,
    },
}

/// Configuration for [`LinkProvider`].
#[derive(Clone)]
pub struct LinkProviderConfig {
    /// Delivery callback
    pub send_link: SendLink,
    /// Custom UI renderer; defaults to JSON state dumps
    pub render: Option<LinkRenderer>,
}

impl std::fmt::Debug for LinkProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkProviderConfig").finish_non_exhaustive()
    }
}

/// The magic-link provider.
#[derive(Debug)]
pub struct LinkProvider {
    config: Arc<LinkProviderConfig>,
}

impl LinkProvider {
    #[allow(missing_docs)]
    pub fn new(send_link: SendLink) -> Self {
        Self {
            config: Arc::new(LinkProviderConfig {
                send_link,
                render: None,
            }),
        }
    }

    #[allow(missing_docs)]
    pub fn from_config(config: LinkProviderConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

/// Pending state parked in the provider cookie once a link is out.
#[derive(Debug, Serialize, Deserialize)]
struct PendingLink {
    token: String,
    claims: Value,
}

#[derive(Clone)]
struct LinkState {
    ctx: ProviderContext,
    config: Arc<LinkProviderConfig>,
}

impl AuthProvider for LinkProvider {
    fn kind(&self) -> &'static str {
        "link"
    }

    fn routes(&self, ctx: ProviderContext) -> Router {
        let state = LinkState {
            ctx,
            config: self.config.clone(),
        };
        Router::new()
            .route("/authorize", get(authorize_get).post(authorize_post))
            .route("/verify", get(verify_get))
            .with_state(state)
    }
}

fn render(config: &LinkProviderConfig, ui: &LinkUi) -> Response {
    if let Some(renderer) = &config.render {
        return renderer(ui);
    }
    match ui {
        LinkUi::Start { error } => Json(json!({"step": "start", "error": error})).into_response(),
        LinkUi::Sent { claims, resend } => {
            Json(json!({"step": "sent", "claims": claims, "resend": resend})).into_response()
        }
    }
}

async fn authorize_get(State(state): State<LinkState>, headers: HeaderMap) -> Response {
    let session = state.ctx.session(&headers).await;
    let response = render(&state.config, &LinkUi::Start { error: None });
    state.ctx.forward(&headers, session, response).await
}

async fn authorize_post(
    State(state): State<LinkState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut session = state.ctx.session(&headers).await;
    let action = form.get("action").map(String::as_str).unwrap_or("request");
    let resend = action == "resend";

    let claims = if resend {
        match session.get::<PendingLink>("state") {
            Some(pending) => pending.claims,
            None => claims_from_form(&form, &["action"]),
        }
    } else {
        claims_from_form(&form, &["action"])
    };

    let origin = match state.ctx.origin(&headers) {
        Ok(origin) => origin,
        Err(err) => return state.ctx.fail(&headers, err).await,
    };
    let token = default_token();
    let link = {
        let mut url = url::form_urlencoded::Serializer::new(format!(
            "{origin}{}/{}/verify?",
            state.ctx.base_path(),
            state.ctx.name()
        ));
        url.append_pair("token", &token);
        if let Some(map) = claims.as_object() {
            for (key, value) in map {
                if let Some(value) = value.as_str() {
                    url.append_pair(key, value);
                }
            }
        }
        url.finish()
    };

    if let Err(message) = (state.config.send_link)(claims.clone(), link).await {
        warn!(provider = state.ctx.name(), error = %message, "link delivery failed");
        let response = render(&state.config, &LinkUi::Start { error: Some(message) });
        return state.ctx.forward(&headers, session, response).await;
    }

    if let Err(err) = session.set(
        "state",
        600,
        &PendingLink { token, claims: claims.clone() },
    ) {
        return state.ctx.fail(&headers, err).await;
    }
    let response = render(&state.config, &LinkUi::Sent { claims, resend });
    state.ctx.forward(&headers, session, response).await
}

async fn verify_get(
    State(state): State<LinkState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut session = state.ctx.session(&headers).await;
    let Some(PendingLink { token, claims }) = session.get("state") else {
        return state
            .ctx
            .fail(&headers, tollgate_core::AuthError::UnknownState)
            .await;
    };

    let submitted = query.get("token").cloned().unwrap_or_default();
    let ok = with_min_duration(Duration::from_millis(50), 20, async {
        let mut ok = timing_safe_eq(&submitted, &token);
        // Every claim baked into the link must match the stored state.
        if let Some(map) = claims.as_object() {
            for (key, value) in map {
                let expected = value.as_str().unwrap_or_default();
                let presented = query.get(key).map(String::as_str).unwrap_or_default();
                ok &= timing_safe_eq(presented, expected);
            }
        }
        ok
    })
    .await;

    if !ok {
        let response = render(
            &state.config,
            &LinkUi::Start { error: Some("invalid_link".into()) },
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
