//! End-to-end issuer flows: authorization code + PKCE, implicit tokens,
//! refresh rotation, and the discovery surface.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use pretty_assertions::{assert_eq, assert_ne};
use serde_json::{json, Value};
use tower::ServiceExt;

use tollgate_core::{pkce, SubjectSchema};
use tollgate_issuer::{
    AuthProvider, Issuer, ProviderContext, SubjectPayload, SuccessOptions, TtlConfig,
};
use tollgate_storage::MemoryStorage;

/// A provider that authenticates anyone who hits `/authorize`.
struct StubProvider;

impl AuthProvider for StubProvider {
    fn kind(&self) -> &'static str {
        "stub"
    }

    fn routes(&self, ctx: ProviderContext) -> Router {
        Router::new().route(
            "/authorize",
            get(move |headers: HeaderMap| {
                let ctx = ctx.clone();
                async move {
                    match ctx
                        .success(&headers, json!({"email": "a@b"}), SuccessOptions::default())
                        .await
                    {
                        Ok(response) => response,
                        Err(err) => ctx.fail(&headers, err).await,
                    }
                }
            }),
        )
    }
}

fn subjects() -> SubjectSchema {
    SubjectSchema::builder()
        .define_raw(
            "user",
            json!({
                "type": "object",
                "properties": { "email": { "type": "string" } },
                "required": ["email"],
            }),
        )
        .build()
        .unwrap()
}

async fn build_issuer(ttl: TtlConfig) -> Router {
    Issuer::builder()
        .storage(Arc::new(MemoryStorage::new()))
        .subjects(subjects())
        .resolve(Arc::new(|output| {
            Box::pin(async move {
                Ok(SubjectPayload {
                    subject_type: "user".to_string(),
                    properties: output.claims,
                })
            })
        }))
        .provider("stub", StubProvider)
        .ttl(ttl)
        .build()
        .await
        .unwrap()
}

/// Track cookies across requests the way a browser would.
#[derive(Default)]
struct Jar(HashMap<String, String>);

impl Jar {
    fn absorb(&mut self, response: &Response) {
        for set_cookie in response.headers().get_all(header::SET_COOKIE) {
            let raw = set_cookie.to_str().unwrap();
            let pair = raw.split(';').next().unwrap();
            let (name, value) = pair.split_once('=').unwrap();
            if value.is_empty() || raw.contains("Max-Age=0") {
                self.0.remove(name);
            } else {
                self.0.insert(name.to_string(), value.to_string());
            }
        }
    }

    fn header(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn get_request(path: &str, jar: &Jar) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(path)
        .header(header::HOST, "auth.example.com");
    if !jar.0.is_empty() {
        builder = builder.header(header::COOKIE, jar.header());
    }
    builder.body(Body::empty()).unwrap()
}

fn form_request(path: &str, form: &[(&str, &str)]) -> Request<Body> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(form)
        .finish();
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::HOST, "auth.example.com")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn location_params(response: &Response) -> (String, HashMap<String, String>) {
    let location = response
        .headers()
        .get(header::LOCATION)
        .expect("redirect location")
        .to_str()
        .unwrap()
        .to_string();
    let url = url::Url::parse(&location).unwrap();
    let params = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    (location, params)
}

/// Drive `/authorize` + the stub provider, returning the authorization
/// code and echoed state.
async fn obtain_code(app: &Router, challenge: Option<&str>) -> (String, String) {
    let mut jar = Jar::default();
    let mut authorize = String::from(
        "/authorize?response_type=code&client_id=client&redirect_uri=https%3A%2F%2Fapp.example.com%2Fcb&state=S1&provider=stub",
    );
    if let Some(challenge) = challenge {
        authorize.push_str(&format!(
            "&code_challenge={challenge}&code_challenge_method=S256"
        ));
    }

    let response = app.clone().oneshot(get_request(&authorize, &jar)).await.unwrap();
    assert!(response.status().is_redirection(), "{}", response.status());
    jar.absorb(&response);

    let response = app
        .clone()
        .oneshot(get_request("/stub/authorize", &jar))
        .await
        .unwrap();
    assert!(response.status().is_redirection(), "{}", response.status());
    let (location, params) = location_params(&response);
    assert!(location.starts_with("https://app.example.com/cb"));
    (params["code"].clone(), params["state"].clone())
}

#[tokio::test]
async fn test_code_flow_with_pkce() {
    let app = build_issuer(TtlConfig::default()).await;
    let pair = pkce::generate_default();
    let (code, state) = obtain_code(&app, Some(&pair.challenge)).await;
    assert_eq!(state, "S1");

    let response = app
        .clone()
        .oneshot(form_request(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "https://app.example.com/cb"),
                ("client_id", "client"),
                ("code_verifier", &pair.verifier),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["expires_in"], json!(2_592_000));
    assert!(body["refresh_token"].as_str().unwrap().starts_with("user:"));
    assert_eq!(body["access_token"].as_str().unwrap().matches('.').count(), 2);
}

#[tokio::test]
async fn test_authorization_code_is_single_use() {
    let app = build_issuer(TtlConfig::default()).await;
    let (code, _) = obtain_code(&app, None).await;
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", "https://app.example.com/cb"),
        ("client_id", "client"),
    ];

    let first = app.clone().oneshot(form_request("/token", &form)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(form_request("/token", &form)).await.unwrap();
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(second).await["error"], json!("invalid_grant"));
}

#[tokio::test]
async fn test_wrong_pkce_verifier_rejected() {
    let app = build_issuer(TtlConfig::default()).await;
    let pair = pkce::generate_default();
    let other = pkce::generate_default();
    let (code, _) = obtain_code(&app, Some(&pair.challenge)).await;

    let response = app
        .clone()
        .oneshot(form_request(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "https://app.example.com/cb"),
                ("client_id", "client"),
                ("code_verifier", &other.verifier),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("invalid_grant"));
}

#[tokio::test]
async fn test_redirect_and_client_mismatches() {
    let app = build_issuer(TtlConfig::default()).await;

    let (code, _) = obtain_code(&app, None).await;
    let response = app
        .clone()
        .oneshot(form_request(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "https://elsewhere.example.com/cb"),
                ("client_id", "client"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["error"], json!("invalid_redirect_uri"));

    let (code, _) = obtain_code(&app, None).await;
    let response = app
        .clone()
        .oneshot(form_request(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "https://app.example.com/cb"),
                ("client_id", "other-client"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["error"], json!("unauthorized_client"));
}

#[tokio::test]
async fn test_refresh_rotation_round_trip() {
    let app = build_issuer(TtlConfig::default()).await;
    let (code, _) = obtain_code(&app, None).await;

    let response = app
        .clone()
        .oneshot(form_request(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "https://app.example.com/cb"),
                ("client_id", "client"),
            ],
        ))
        .await
        .unwrap();
    let issued = json_body(response).await;
    let refresh = issued["refresh_token"].as_str().unwrap().to_string();

    let rotate = |token: String| {
        let app = app.clone();
        async move {
            let response = app
                .oneshot(form_request(
                    "/token",
                    &[("grant_type", "refresh_token"), ("refresh_token", &token)],
                ))
                .await
                .unwrap();
            (response.status(), json_body(response).await)
        }
    };

    let (status, rotated) = rotate(refresh.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let successor = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(successor, refresh);

    // Retry inside the reuse window: same successor.
    let (status, retried) = rotate(refresh.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retried["refresh_token"], rotated["refresh_token"]);

    // The successor rotates onward.
    let (status, next) = rotate(successor).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(next["refresh_token"], rotated["refresh_token"]);
}

#[tokio::test]
async fn test_refresh_reuse_past_window_invalidates_chain() {
    let app = build_issuer(TtlConfig {
        reuse: 1,
        retention: 60,
        ..TtlConfig::default()
    })
    .await;
    let (code, _) = obtain_code(&app, None).await;
    let issued = json_body(
        app.clone()
            .oneshot(form_request(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", &code),
                    ("redirect_uri", "https://app.example.com/cb"),
                    ("client_id", "client"),
                ],
            ))
            .await
            .unwrap(),
    )
    .await;
    let refresh = issued["refresh_token"].as_str().unwrap().to_string();

    let rotated = json_body(
        app.clone()
            .oneshot(form_request(
                "/token",
                &[("grant_type", "refresh_token"), ("refresh_token", &refresh)],
            ))
            .await
            .unwrap(),
    )
    .await;
    let successor = rotated["refresh_token"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    // Replay past the window: theft signal.
    let response = app
        .clone()
        .oneshot(form_request(
            "/token",
            &[("grant_type", "refresh_token"), ("refresh_token", &refresh)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("invalid_grant"));

    // The whole chain is gone, successor included.
    let response = app
        .clone()
        .oneshot(form_request(
            "/token",
            &[("grant_type", "refresh_token"), ("refresh_token", &successor)],
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["error"], json!("invalid_grant"));
}

#[tokio::test]
async fn test_token_flow_returns_fragment() {
    let app = build_issuer(TtlConfig::default()).await;
    let mut jar = Jar::default();

    let response = app
        .clone()
        .oneshot(get_request(
            "/authorize?response_type=token&client_id=client&redirect_uri=https%3A%2F%2Fapp.example.com%2Fcb&state=S9&provider=stub",
            &jar,
        ))
        .await
        .unwrap();
    jar.absorb(&response);

    let response = app
        .clone()
        .oneshot(get_request("/stub/authorize", &jar))
        .await
        .unwrap();
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    let fragment = location.split('#').nth(1).expect("fragment");
    assert!(fragment.contains("access_token="));
    assert!(fragment.contains("token_type=Bearer"));
    assert!(fragment.contains("state=S9"));
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let app = build_issuer(TtlConfig::default()).await;
    let response = app
        .oneshot(form_request(
            "/token",
            &[("grant_type", "client_credentials")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        json!("unsupported_grant_type")
    );
}

#[tokio::test]
async fn test_authorize_parameter_errors() {
    let app = build_issuer(TtlConfig::default()).await;

    // No redirect target at all: plain 400.
    let response = app
        .clone()
        .oneshot(get_request("/authorize?response_type=code", &Jar::default()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing client_id: redirect-delivered invalid_request.
    let response = app
        .clone()
        .oneshot(get_request(
            "/authorize?response_type=code&redirect_uri=https%3A%2F%2Fapp.example.com%2Fcb&state=S2",
            &Jar::default(),
        ))
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    let (_, params) = location_params(&response);
    assert_eq!(params["error"], "invalid_request");
    assert_eq!(params["state"], "S2");
}

#[tokio::test]
async fn test_foreign_redirect_rejected_by_allow_check() {
    let app = build_issuer(TtlConfig::default()).await;
    let response = app
        .oneshot(get_request(
            "/authorize?response_type=code&client_id=client&redirect_uri=https%3A%2F%2Fevil.com%2Fcb&state=S3",
            &Jar::default(),
        ))
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    let (_, params) = location_params(&response);
    assert_eq!(params["error"], "unauthorized_client");
}

#[tokio::test]
async fn test_wellknown_discovery_document() {
    let app = build_issuer(TtlConfig::default()).await;
    let response = app
        .oneshot(get_request(
            "/.well-known/oauth-authorization-server",
            &Jar::default(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["issuer"], json!("http://auth.example.com"));
    assert_eq!(
        body["token_endpoint"],
        json!("http://auth.example.com/token")
    );
    assert_eq!(body["response_types_supported"], json!(["code", "token"]));
}

#[tokio::test]
async fn test_jwks_serves_signing_key_and_verifies_access_token() {
    let app = build_issuer(TtlConfig::default()).await;
    let (code, _) = obtain_code(&app, None).await;
    let issued = json_body(
        app.clone()
            .oneshot(form_request(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", &code),
                    ("redirect_uri", "https://app.example.com/cb"),
                    ("client_id", "client"),
                ],
            ))
            .await
            .unwrap(),
    )
    .await;
    let access = issued["access_token"].as_str().unwrap();

    let jwks_body = json_body(
        app.clone()
            .oneshot(get_request("/.well-known/jwks.json", &Jar::default()))
            .await
            .unwrap(),
    )
    .await;
    let jwks: jsonwebtoken::jwk::JwkSet = serde_json::from_value(jwks_body.clone()).unwrap();
    assert_eq!(jwks_body["keys"][0]["alg"], json!("ES256"));

    let header = jsonwebtoken::decode_header(access).unwrap();
    let jwk = jwks.find(header.kid.as_deref().unwrap()).expect("kid in jwks");
    let key = jsonwebtoken::DecodingKey::from_jwk(jwk).unwrap();
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::ES256);
    validation.set_audience(&["client"]);
    validation.set_issuer(&["http://auth.example.com"]);
    let decoded = jsonwebtoken::decode::<Value>(access, &key, &validation).unwrap();
    assert_eq!(decoded.claims["mode"], json!("access"));
    assert_eq!(decoded.claims["type"], json!("user"));
    assert_eq!(decoded.claims["properties"]["email"], json!("a@b"));
    assert!(decoded.claims["sub"].as_str().unwrap().starts_with("user:"));
}
