//! Issuer assembly: builder, router, `/authorize`, `/token`,
//! `/.well-known/*`, and the error funnel.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use futures::future::BoxFuture;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};
use url::Url;

use tollgate_core::random::default_token;
use tollgate_core::{
    pkce, resolve_subject, AuthError, KeyManager, OauthError, OauthErrorCode, Result,
    RevocationLedger, SubjectSchema,
};
use tollgate_storage::{Storage, StorageExt, StorageKey};

use crate::allow::{default_allow, AllowRequest};
use crate::plugin::{Plugin, PluginError, PluginManager};
use crate::provider::{AuthProvider, ProviderContext, ProviderOutput, SubjectPayload, SuccessOptions};
use crate::request::external_origin;
use crate::session::{append_set_cookie, CookieCodec, CookieRead, AUTHORIZATION_COOKIE};
use crate::state::{
    AuthorizationState, CodePayload, PkceChallenge, ResponseType, TokenTtl, TtlConfig,
    AUTHORIZATION_COOKIE_TTL_SECS, CODE_TTL_SECS,
};
use crate::token::{self, IssuedTokens, RefreshHook, CODE_PREFIX};

/// Host-supplied allow check; `false` rejects with `unauthorized_client`.
pub type AllowHook = Arc<dyn Fn(AllowRequest) -> BoxFuture<'static, bool> + Send + Sync>;

/// Maps a provider's output onto a registered subject variant.
pub type SubjectResolver =
    Arc<dyn Fn(ProviderOutput) -> BoxFuture<'static, Result<SubjectPayload>> + Send + Sync>;

/// Renders the provider-selection page when `/authorize` has no target.
pub type SelectRenderer = Arc<dyn Fn(&[String]) -> Response + Send + Sync>;

/// Renders unknown-state errors (cookie lost mid-flow).
pub type ErrorRenderer = Arc<dyn Fn(&AuthError) -> Response + Send + Sync>;

/// Errors raised while assembling the issuer.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("issuer requires a storage adapter")]
    MissingStorage,

    #[error("issuer requires a subject schema")]
    MissingSubjects,

    #[error("issuer requires a subject resolver")]
    MissingResolver,

    #[error("issuer requires at least one provider")]
    NoProviders,

    #[error("duplicate provider name: {0}")]
    DuplicateProvider(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Entry point: `Issuer::builder()...build().await` yields the router.
pub struct Issuer;

impl Issuer {
    /// Start configuring an issuer.
    pub fn builder() -> IssuerBuilder {
        IssuerBuilder::default()
    }
}

/// Issuer configuration builder.
#[derive(Default)]
pub struct IssuerBuilder {
    storage: Option<Arc<dyn Storage>>,
    subjects: Option<SubjectSchema>,
    resolver: Option<SubjectResolver>,
    providers: Vec<(String, Box<dyn AuthProvider>)>,
    plugins: Vec<Arc<dyn Plugin>>,
    ttl: TtlConfig,
    base_path: String,
    allow: Option<AllowHook>,
    select: Option<SelectRenderer>,
    error_renderer: Option<ErrorRenderer>,
    refresh: Option<RefreshHook>,
}

impl IssuerBuilder {
    /// Storage adapter backing codes, refresh rows, keys and providers.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Subject schema every issued token is validated against.
    pub fn subjects(mut self, subjects: SubjectSchema) -> Self {
        self.subjects = Some(subjects);
        self
    }

    /// Map provider output onto a subject variant.
    pub fn resolve(mut self, resolver: SubjectResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Register a provider under `name`, mounted at `/<name>`.
    pub fn provider(mut self, name: impl Into<String>, provider: impl AuthProvider) -> Self {
        self.providers.push((name.into(), Box::new(provider)));
        self
    }

    /// Register a plugin; id and route collisions surface at build.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Override the default token TTLs.
    pub fn ttl(mut self, ttl: TtlConfig) -> Self {
        self.ttl = ttl;
        self
    }

    /// Path prefix the host mounts this issuer under (e.g. `/auth`).
    /// Used for cookie paths and generated URLs; the host still performs
    /// the actual mounting.
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Replace the default redirect-domain allow check.
    pub fn allow(mut self, allow: AllowHook) -> Self {
        self.allow = Some(allow);
        self
    }

    /// Render the provider-selection response.
    pub fn select(mut self, select: SelectRenderer) -> Self {
        self.select = Some(select);
        self
    }

    /// Render unknown-state errors.
    pub fn error_renderer(mut self, renderer: ErrorRenderer) -> Self {
        self.error_renderer = Some(renderer);
        self
    }

    /// Inspect/override refresh grants before rotation.
    pub fn refresh(mut self, hook: RefreshHook) -> Self {
        self.refresh = Some(hook);
        self
    }

    /// Assemble the router. Runs every plugin's `on_init` hook; any
    /// failure aborts the build.
    pub async fn build(self) -> std::result::Result<Router, BuildError> {
        let storage = self.storage.ok_or(BuildError::MissingStorage)?;
        let subjects = self.subjects.ok_or(BuildError::MissingSubjects)?;
        let resolver = self.resolver.ok_or(BuildError::MissingResolver)?;
        if self.providers.is_empty() {
            return Err(BuildError::NoProviders);
        }
        {
            let mut seen = std::collections::HashSet::new();
            for (name, _) in &self.providers {
                if !seen.insert(name.clone()) {
                    return Err(BuildError::DuplicateProvider(name.clone()));
                }
            }
        }

        let mut plugins = PluginManager::new();
        for plugin in self.plugins {
            plugins.register(plugin)?;
        }
        plugins.run_init(&storage).await?;
        let plugin_router = plugins.build_router()?;

        let keys = Arc::new(KeyManager::new(storage.clone()));
        let cookies = CookieCodec::new(keys.clone(), self.base_path.clone());
        let provider_names: Vec<String> =
            self.providers.iter().map(|(name, _)| name.clone()).collect();

        let shared = Arc::new(IssuerShared {
            storage: storage.clone(),
            keys,
            cookies,
            subjects,
            resolver,
            ttl: self.ttl,
            base_path: self.base_path,
            allow: self.allow,
            select: self.select,
            error_renderer: self.error_renderer,
            refresh: self.refresh,
            plugins,
            revocation: RevocationLedger::new(storage),
            provider_names,
        });

        let token_routes = Router::new()
            .route("/token", post(token_handler))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::POST])
                    .allow_headers(Any),
            );
        let wellknown_routes = Router::new()
            .route(
                "/.well-known/oauth-authorization-server",
                get(wellknown_handler),
            )
            .route("/.well-known/jwks.json", get(jwks_handler))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET]),
            );

        let mut app = Router::new()
            .route("/authorize", get(authorize_handler))
            .merge(token_routes)
            .merge(wellknown_routes)
            .with_state(shared.clone());

        for (name, provider) in &self.providers {
            let ctx = ProviderContext::new(name, shared.clone());
            info!(provider = %name, kind = provider.kind(), "mounting provider");
            app = app.nest(&format!("/{name}"), provider.routes(ctx));
        }
        if !shared.plugins.is_empty() {
            app = app.nest("/plugin", plugin_router);
        }

        Ok(app)
    }
}

/// Resolved issuer state shared by every handler and provider.
pub struct IssuerShared {
    storage: Arc<dyn Storage>,
    keys: Arc<KeyManager>,
    cookies: CookieCodec,
    subjects: SubjectSchema,
    resolver: SubjectResolver,
    ttl: TtlConfig,
    base_path: String,
    allow: Option<AllowHook>,
    select: Option<SelectRenderer>,
    error_renderer: Option<ErrorRenderer>,
    refresh: Option<RefreshHook>,
    plugins: PluginManager,
    revocation: RevocationLedger,
    provider_names: Vec<String>,
}

impl std::fmt::Debug for IssuerShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerShared")
            .field("base_path", &self.base_path)
            .field("providers", &self.provider_names)
            .finish_non_exhaustive()
    }
}

impl IssuerShared {
    pub(crate) fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub(crate) fn cookies(&self) -> &CookieCodec {
        &self.cookies
    }

    pub(crate) fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Externally visible origin of this request.
    pub(crate) fn origin(&self, headers: &HeaderMap) -> Result<String> {
        external_origin(headers, None).ok_or_else(|| {
            AuthError::Oauth(OauthError::server_error(
                "unable to determine request host",
            ))
        })
    }

    /// Issuer identifier: origin plus base path.
    pub(crate) fn issuer_url(&self, origin: &str) -> String {
        format!("{origin}{}", self.base_path)
    }

    pub(crate) async fn invalidate_subject(&self, subject: &str) -> Result<()> {
        token::invalidate_subject(&self.storage, subject).await
    }

    async fn check_allow(&self, request: AllowRequest) -> bool {
        match &self.allow {
            Some(hook) => hook(request).await,
            None => default_allow(&request),
        }
    }

    fn render_unknown_state(&self, err: &AuthError) -> Response {
        match &self.error_renderer {
            Some(renderer) => renderer(err),
            None => (
                StatusCode::BAD_REQUEST,
                "authorization state is missing or expired",
            )
                .into_response(),
        }
    }

    fn render_select(&self) -> Response {
        match &self.select {
            Some(renderer) => renderer(&self.provider_names),
            None => Json(json!({ "providers": self.provider_names })).into_response(),
        }
    }

    /// The error funnel for flows that may have a redirect target in the
    /// authorization cookie (providers, `/authorize` internals).
    pub(crate) async fn handle_error(&self, headers: &HeaderMap, err: AuthError) -> Response {
        self.plugins.run_error(&self.storage, "GET", "/").await;

        if matches!(err, AuthError::UnknownState) {
            // The cookie is unreadable or stale either way: drop it so the
            // browser starts the next flow clean.
            let mut response = self.render_unknown_state(&err);
            append_set_cookie(
                response.headers_mut(),
                &self.cookies.removal(AUTHORIZATION_COOKIE, headers),
            );
            return response;
        }

        let target: Option<AuthorizationState> = self
            .cookies
            .open(AUTHORIZATION_COOKIE, headers)
            .await
            .ok()
            .and_then(CookieRead::into_option);

        match target {
            Some(auth) => redirect_with_error(&auth.redirect_uri, &err.to_oauth(), &auth.state),
            None => {
                let oauth = err.to_oauth();
                error!(code = %oauth.code, description = %oauth.description, "unroutable flow error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": oauth.code,
                        "error_description": oauth.description,
                    })),
                )
                    .into_response()
            }
        }
    }

    /// Complete a provider flow: resolve and validate the subject, then
    /// issue a code or tokens per the stored authorization state.
    pub(crate) async fn complete_success(
        &self,
        provider: &str,
        headers: &HeaderMap,
        output: ProviderOutput,
        opts: SuccessOptions,
    ) -> Result<Response> {
        let auth: AuthorizationState = match self
            .cookies
            .open(AUTHORIZATION_COOKIE, headers)
            .await?
        {
            CookieRead::Valid(auth) => auth,
            CookieRead::Missing | CookieRead::Corrupt => return Err(AuthError::UnknownState),
        };

        let payload = (self.resolver)(output).await?;
        self.subjects
            .validate(&payload.subject_type, &payload.properties)?;
        let subject = opts
            .subject
            .clone()
            .unwrap_or_else(|| resolve_subject(&payload.subject_type, &payload.properties));
        if let Some(hook) = &opts.on_subject {
            hook(subject.clone()).await;
        }

        let origin = self.origin(headers)?;
        let issuer = self.issuer_url(&origin);
        let ttl = TokenTtl {
            access: opts.ttl_access.unwrap_or(self.ttl.access),
            refresh: opts.ttl_refresh.unwrap_or(self.ttl.refresh),
        };
        let scopes: Option<Vec<String>> = auth
            .scope
            .as_ref()
            .map(|s| s.split_whitespace().map(String::from).collect());

        let mut response = match auth.response_type {
            ResponseType::Token => {
                let tokens = token::issue_tokens(
                    &self.storage,
                    &self.keys,
                    &issuer,
                    &auth.client_id,
                    &payload.subject_type,
                    &payload.properties,
                    &subject,
                    ttl,
                    scopes,
                )
                .await?;
                let fragment = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("access_token", &tokens.access)
                    .append_pair("token_type", "Bearer")
                    .append_pair("expires_in", &tokens.expires_in.to_string())
                    .append_pair("state", &auth.state)
                    .finish();
                let mut url = parse_redirect(&auth.redirect_uri)?;
                url.set_fragment(Some(&fragment));
                Redirect::to(url.as_str()).into_response()
            }
            ResponseType::Code => {
                let code = default_token();
                let payload = CodePayload {
                    subject_type: payload.subject_type.clone(),
                    properties: payload.properties.clone(),
                    subject: subject.clone(),
                    redirect_uri: auth.redirect_uri.clone(),
                    client_id: auth.client_id.clone(),
                    pkce: auth.pkce.clone(),
                    ttl,
                    scopes,
                };
                self.storage
                    .set_json(
                        &StorageKey::new([CODE_PREFIX, &code])?,
                        &payload,
                        Some(CODE_TTL_SECS),
                    )
                    .await?;
                let mut url = parse_redirect(&auth.redirect_uri)?;
                url.query_pairs_mut()
                    .append_pair("code", &code)
                    .append_pair("state", &auth.state);
                Redirect::to(url.as_str()).into_response()
            }
        };

        let headers_mut = response.headers_mut();
        append_set_cookie(headers_mut, &self.cookies.removal(AUTHORIZATION_COOKIE, headers));
        append_set_cookie(headers_mut, &self.cookies.removal(provider, headers));

        info!(provider = %provider, subject = %subject, "authentication completed");
        self.plugins
            .run_success(&self.storage, "GET", &format!("/{provider}"))
            .await;
        Ok(response)
    }
}

fn parse_redirect(redirect_uri: &str) -> Result<Url> {
    Url::parse(redirect_uri).map_err(|_| {
        AuthError::Oauth(OauthError::new(
            OauthErrorCode::InvalidRedirectUri,
            "redirect_uri is not a valid URL",
        ))
    })
}

fn redirect_with_error(redirect_uri: &str, oauth: &OauthError, state: &str) -> Response {
    match Url::parse(redirect_uri) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("error", oauth.code.as_str())
                .append_pair("error_description", &oauth.description)
                .append_pair("state", state);
            Redirect::to(url.as_str()).into_response()
        }
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": oauth.code,
                "error_description": oauth.description,
            })),
        )
            .into_response(),
    }
}

fn oauth_error_response(oauth: &OauthError) -> Response {
    let status = if oauth.code == OauthErrorCode::ServerError {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    };
    (
        status,
        Json(json!({
            "error": oauth.code,
            "error_description": oauth.description,
        })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// /authorize

async fn authorize_handler(
    State(shared): State<Arc<IssuerShared>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(message) = shared
        .plugins
        .run_authorize(&shared.storage, "GET", "/authorize")
        .await
    {
        error!(error = %message, "on_authorize hook failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "server_error", "error_description": message})),
        )
            .into_response();
    }

    // Without a redirect target there is nowhere to deliver errors: 400.
    let Some(redirect_uri) = query.get("redirect_uri").cloned() else {
        return (StatusCode::BAD_REQUEST, "missing redirect_uri").into_response();
    };
    let state = query.get("state").cloned().unwrap_or_default();

    match authorize_inner(&shared, &headers, &query, &redirect_uri).await {
        Ok(response) => response,
        Err(err) => {
            shared.plugins.run_error(&shared.storage, "GET", "/authorize").await;
            if matches!(err, AuthError::UnknownState) {
                return shared.render_unknown_state(&err);
            }
            redirect_with_error(&redirect_uri, &err.to_oauth(), &state)
        }
    }
}

async fn authorize_inner(
    shared: &Arc<IssuerShared>,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    redirect_uri: &str,
) -> Result<Response> {
    let response_type = query
        .get("response_type")
        .ok_or(AuthError::MissingParameter("response_type"))?;
    let response_type = match response_type.as_str() {
        "code" => ResponseType::Code,
        "token" => ResponseType::Token,
        other => {
            return Err(OauthError::new(
                OauthErrorCode::InvalidRequest,
                format!("unsupported response_type {other:?}"),
            )
            .into());
        }
    };
    let client_id = query
        .get("client_id")
        .ok_or(AuthError::MissingParameter("client_id"))?
        .clone();
    let audience = query.get("audience").cloned();

    let allow_request =
        AllowRequest::new(&client_id, redirect_uri, audience.as_deref(), headers);
    if !shared.check_allow(allow_request).await {
        return Err(AuthError::UnauthorizedClient { client_id });
    }

    let pkce = match query.get("code_challenge") {
        Some(challenge) => {
            let method = query
                .get("code_challenge_method")
                .map(String::as_str)
                .unwrap_or("S256");
            if method != "S256" {
                return Err(OauthError::new(
                    OauthErrorCode::InvalidRequest,
                    "only the S256 code_challenge_method is supported",
                )
                .into());
            }
            Some(PkceChallenge {
                challenge: challenge.clone(),
                method: method.to_string(),
            })
        }
        None => None,
    };

    let auth = AuthorizationState {
        response_type,
        redirect_uri: redirect_uri.to_string(),
        state: query.get("state").cloned().unwrap_or_default(),
        client_id,
        audience,
        pkce,
        scope: query.get("scope").cloned(),
    };
    let cookie = shared
        .cookies
        .seal(AUTHORIZATION_COOKIE, &auth, AUTHORIZATION_COOKIE_TTL_SECS, headers)
        .await?;

    let mut response = match query.get("provider") {
        Some(provider) => {
            if !shared.provider_names.contains(provider) {
                return Err(OauthError::new(
                    OauthErrorCode::InvalidRequest,
                    format!("unknown provider {provider:?}"),
                )
                .into());
            }
            Redirect::to(&format!("{}/{provider}/authorize", shared.base_path)).into_response()
        }
        None if shared.provider_names.len() == 1 => Redirect::to(&format!(
            "{}/{}/authorize",
            shared.base_path, shared.provider_names[0]
        ))
        .into_response(),
        None => shared.render_select(),
    };
    append_set_cookie(response.headers_mut(), &cookie);
    debug!(client_id = %auth.client_id, response_type = ?auth.response_type, "authorization flow started");
    Ok(response)
}

// ---------------------------------------------------------------------------
// /token

async fn token_handler(
    State(shared): State<Arc<IssuerShared>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let result = match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => code_grant(&shared, &headers, &form).await,
        Some("refresh_token") => {
            let origin = match shared.origin(&headers) {
                Ok(origin) => origin,
                Err(err) => return oauth_error_response(&err.to_oauth()),
            };
            let issuer = shared.issuer_url(&origin);
            let Some(wire_token) = form.get("refresh_token") else {
                return oauth_error_response(&OauthError::new(
                    OauthErrorCode::InvalidRequest,
                    "refresh_token is required",
                ));
            };
            token::refresh_grant(
                &shared.storage,
                &shared.keys,
                &shared.revocation,
                shared.refresh.as_ref(),
                &shared.ttl,
                &issuer,
                wire_token,
            )
            .await
        }
        _ => Err(OauthError::new(
            OauthErrorCode::UnsupportedGrantType,
            "grant_type must be authorization_code or refresh_token",
        )
        .into()),
    };

    match result {
        Ok(tokens) => token_response(&tokens),
        Err(err) => oauth_error_response(&err.to_oauth()),
    }
}

fn token_response(tokens: &IssuedTokens) -> Response {
    Json(json!({
        "access_token": tokens.access,
        "refresh_token": tokens.refresh,
        "expires_in": tokens.expires_in,
    }))
    .into_response()
}

async fn code_grant(
    shared: &Arc<IssuerShared>,
    headers: &HeaderMap,
    form: &HashMap<String, String>,
) -> Result<IssuedTokens> {
    let code = form
        .get("code")
        .ok_or_else(|| OauthError::new(OauthErrorCode::InvalidRequest, "code is required"))?;

    // Single-use: the row is consumed atomically, so a concurrent exchange
    // of the same code observes absence.
    let payload = shared
        .storage
        .take(&StorageKey::new([CODE_PREFIX, code])?)
        .await?
        .map(serde_json::from_value::<CodePayload>)
        .transpose()?
        .ok_or_else(|| {
            OauthError::invalid_grant("authorization code has been used or has expired")
        })?;

    let redirect_uri = form.get("redirect_uri").ok_or_else(|| {
        OauthError::new(OauthErrorCode::InvalidRequest, "redirect_uri is required")
    })?;
    if *redirect_uri != payload.redirect_uri {
        return Err(OauthError::new(
            OauthErrorCode::InvalidRedirectUri,
            "redirect_uri does not match the authorization request",
        )
        .into());
    }

    let client_id = form.get("client_id").ok_or_else(|| {
        OauthError::new(OauthErrorCode::InvalidRequest, "client_id is required")
    })?;
    if *client_id != payload.client_id {
        return Err(OauthError::new(
            OauthErrorCode::UnauthorizedClient,
            "client_id does not match the authorization request",
        )
        .into());
    }

    if let Some(challenge) = &payload.pkce {
        let verifier = form.get("code_verifier").map(String::as_str).unwrap_or("");
        if !pkce::validate(verifier, &challenge.challenge, &challenge.method).await {
            return Err(OauthError::invalid_grant("code_verifier does not match").into());
        }
    }

    let origin = shared.origin(headers)?;
    let issuer = shared.issuer_url(&origin);
    token::issue_tokens(
        &shared.storage,
        &shared.keys,
        &issuer,
        &payload.client_id,
        &payload.subject_type,
        &payload.properties,
        &payload.subject,
        payload.ttl,
        payload.scopes,
    )
    .await
}

// ---------------------------------------------------------------------------
// /.well-known

async fn wellknown_handler(
    State(shared): State<Arc<IssuerShared>>,
    headers: HeaderMap,
) -> Response {
    let origin = match shared.origin(&headers) {
        Ok(origin) => origin,
        Err(err) => return oauth_error_response(&err.to_oauth()),
    };
    let issuer = shared.issuer_url(&origin);
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "jwks_uri": format!("{issuer}/.well-known/jwks.json"),
        "response_types_supported": ["code", "token"],
    }))
    .into_response()
}

async fn jwks_handler(State(shared): State<Arc<IssuerShared>>) -> Response {
    match shared.keys.jwks().await {
        Ok(jwks) => Json(jwks).into_response(),
        Err(err) => {
            warn!(error = %err, "jwks publication failed");
            oauth_error_response(&err.to_oauth())
        }
    }
}
