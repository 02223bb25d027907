//! Client verifier against a mocked issuer.

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tollgate_client::{
    AuthorizeOptions, Client, ClientConfig, ClientError, VerifyOptions,
};
use tollgate_core::keys::SigningKeyPair;
use tollgate_core::{pkce, AccessClaims, SubjectSchema};

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

fn sign(key: &SigningKeyPair, claims: &AccessClaims) -> String {
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::ES256);
    header.kid = Some(key.id.clone());
    header.typ = Some("JWT".to_string());
    jsonwebtoken::encode(&header, claims, key.encoding_key()).unwrap()
}

fn claims(issuer: &str, exp_offset: i64) -> AccessClaims {
    let now = Utc::now().timestamp();
    AccessClaims {
        mode: "access".to_string(),
        subject_type: "user".to_string(),
        properties: json!({"email": "a@b"}),
        sub: "user:0011223344556677".to_string(),
        aud: "client".to_string(),
        iss: issuer.to_string(),
        iat: now - 600,
        exp: now + exp_offset,
    }
}

struct Harness {
    server: MockServer,
    key: SigningKeyPair,
    client: Client,
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let key = SigningKeyPair::generate().unwrap();
    let issuer = server.uri();

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
            "jwks_uri": format!("{issuer}/.well-known/jwks.json"),
            "response_types_supported": ["code", "token"],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "keys": [key.jwks_entry()] })),
        )
        .mount(&server)
        .await;

    let client = Client::new(ClientConfig {
        client_id: "client".into(),
        issuer: issuer.clone(),
        http: None,
    });
    Harness { server, key, client }
}

#[tokio::test]
async fn test_authorize_builds_url_with_pkce() {
    let h = harness().await;
    let authorize = h
        .client
        .authorize(
            "https://app.example.com/cb",
            "code",
            AuthorizeOptions {
                pkce: true,
                provider: Some("password".into()),
                scopes: vec!["openid".into()],
            },
        )
        .await
        .unwrap();

    assert!(authorize.url.starts_with(&format!("{}/authorize?", h.server.uri())));
    assert!(authorize.url.contains("client_id=client"));
    assert!(authorize.url.contains("response_type=code"));
    assert!(authorize.url.contains("provider=password"));
    assert!(authorize.url.contains("scope=openid"));

    // The embedded challenge matches the held verifier.
    let verifier = authorize.challenge.verifier.as_deref().unwrap();
    let expected = pkce::challenge_of(verifier);
    assert!(authorize.url.contains(&format!("code_challenge={expected}")));
    assert!(!authorize.challenge.state.is_empty());
}

#[tokio::test]
async fn test_exchange_success_and_failure() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=good-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at",
            "refresh_token": "user:x:rt",
            "expires_in": 2_592_000u64,
        })))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "authorization code has been used or has expired",
        })))
        .mount(&h.server)
        .await;

    let tokens = h
        .client
        .exchange("good-code", "https://app.example.com/cb", None)
        .await
        .unwrap();
    assert_eq!(tokens.access, "at");
    assert_eq!(tokens.expires_in, 2_592_000);

    let err = h
        .client
        .exchange("bad-code", "https://app.example.com/cb", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidAuthorizationCode));
}

#[tokio::test]
async fn test_verify_valid_token() {
    let h = harness().await;
    let token = sign(&h.key, &claims(&h.server.uri(), 3600));

    let result = h
        .client
        .verify(&subjects(), &token, VerifyOptions::default())
        .await
        .unwrap();
    assert_eq!(result.subject.subject_type, "user");
    assert_eq!(result.subject.properties["email"], json!("a@b"));
    assert_eq!(result.aud, "client");
    assert!(result.subject_id.starts_with("user:"));
    assert!(result.tokens.is_none());
}

#[tokio::test]
async fn test_verify_rejects_wrong_issuer() {
    let h = harness().await;
    let token = sign(&h.key, &claims("https://evil.example.com", 3600));
    let err = h
        .client
        .verify(&subjects(), &token, VerifyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidAccessToken(_)));
}

#[tokio::test]
async fn test_verify_rejects_non_access_mode() {
    let h = harness().await;
    let mut wrong_mode = claims(&h.server.uri(), 3600);
    wrong_mode.mode = "refresh".to_string();
    let token = sign(&h.key, &wrong_mode);

    let err = h
        .client
        .verify(&subjects(), &token, VerifyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidAccessToken(_)));
}

#[tokio::test]
async fn test_verify_rejects_schema_violation() {
    let h = harness().await;
    let mut bad_props = claims(&h.server.uri(), 3600);
    bad_props.properties = json!({"email": 42});
    let token = sign(&h.key, &bad_props);

    let err = h
        .client
        .verify(&subjects(), &token, VerifyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidSubject(_)));
}

#[tokio::test]
async fn test_verify_expired_without_refresh_fails() {
    let h = harness().await;
    // Past the default 60s validation leeway.
    let token = sign(&h.key, &claims(&h.server.uri(), -300));
    let err = h
        .client
        .verify(&subjects(), &token, VerifyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidAccessToken(_)));
}

#[tokio::test]
async fn test_verify_refreshes_expired_token() {
    let h = harness().await;
    let expired = sign(&h.key, &claims(&h.server.uri(), -300));
    let fresh = sign(&h.key, &claims(&h.server.uri(), 3600));

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": fresh,
            "refresh_token": "user:0011223344556677:next",
            "expires_in": 2_592_000u64,
        })))
        .mount(&h.server)
        .await;

    let result = h
        .client
        .verify(
            &subjects(),
            &expired,
            VerifyOptions {
                refresh: Some("user:0011223344556677:current".to_string()),
            },
        )
        .await
        .unwrap();

    let tokens = result.tokens.expect("refreshed tokens");
    assert_eq!(tokens.refresh, "user:0011223344556677:next");
    assert_eq!(result.subject.properties["email"], json!("a@b"));

    // The returned access token verifies on its own.
    let direct = h
        .client
        .verify(&subjects(), &tokens.access, VerifyOptions::default())
        .await
        .unwrap();
    assert!(direct.tokens.is_none());
}

#[tokio::test]
async fn test_refresh_short_circuits_on_valid_access() {
    let h = harness().await;
    // The token endpoint must never be called.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&h.server)
        .await;

    let access = sign(&h.key, &claims(&h.server.uri(), 3600));
    let result = h
        .client
        .refresh("user:x:rt", Some(&access))
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_caches_survive_and_reset() {
    let h = harness().await;
    let token = sign(&h.key, &claims(&h.server.uri(), 3600));

    h.client
        .verify(&subjects(), &token, VerifyOptions::default())
        .await
        .unwrap();

    // Discovery and JWKS were each fetched exactly once so far.
    let requests = h.server.received_requests().await.unwrap();
    let discovery_hits = requests
        .iter()
        .filter(|r| r.url.path() == "/.well-known/oauth-authorization-server")
        .count();
    assert_eq!(discovery_hits, 1);

    h.client
        .verify(&subjects(), &token, VerifyOptions::default())
        .await
        .unwrap();
    let requests = h.server.received_requests().await.unwrap();
    let discovery_hits = requests
        .iter()
        .filter(|r| r.url.path() == "/.well-known/oauth-authorization-server")
        .count();
    assert_eq!(discovery_hits, 1, "metadata served from cache");

    h.client.reset_caches().await;
    h.client
        .verify(&subjects(), &token, VerifyOptions::default())
        .await
        .unwrap();
    let requests = h.server.received_requests().await.unwrap();
    let discovery_hits = requests
        .iter()
        .filter(|r| r.url.path() == "/.well-known/oauth-authorization-server")
        .count();
    assert_eq!(discovery_hits, 2, "reset forces a refetch");
}
