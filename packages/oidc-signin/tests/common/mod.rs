#![allow(clippy::expect_used, clippy::unwrap_used, dead_code)]

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use openidconnect::core::{CoreJsonWebKeySet, CoreJwsSigningAlgorithm, CoreRsaPrivateSigningKey};
use openidconnect::{
    Audience, EndUserEmail, EndUserUsername, IdTokenClaims, IssuerUrl, JsonWebKeyId, Nonce,
    PrivateSigningKey, StandardClaims, SubjectIdentifier,
};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use tower::ServiceExt;
use tower_sessions_memory_store::MemoryStore;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oidc_signin::oidc::{ExtraClaims, SignInIdToken};
use oidc_signin::{AppConfig, AppState, OidcProvider};

pub const CLIENT_ID: &str = "abc";
pub const MSA_TENANT: &str = "9188040d-6c67-4c5b-b112-36a304b66dad";
pub const KEY_ID: &str = "test-key";
pub const ROTATED_KEY_ID: &str = "rotated";

/// A mock identity provider serving discovery and signing keys.
pub struct TestProvider {
    pub server: MockServer,
}

impl TestProvider {
    pub async fn start() -> Self {
        let provider = Self::with_discovery().await;
        let keys = CoreJsonWebKeySet::new(vec![signing_key().as_verification_key()]);
        Mock::given(method("GET"))
            .and(path("/common/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&keys))
            .mount(&provider.server)
            .await;
        provider
    }

    /// A provider that publishes only the original key on the first key
    /// fetch and adds a rotated key on every later one.
    pub async fn start_rotating() -> Self {
        let provider = Self::with_discovery().await;
        let original = CoreJsonWebKeySet::new(vec![signing_key().as_verification_key()]);
        let rotated = CoreJsonWebKeySet::new(vec![
            signing_key().as_verification_key(),
            rotated_signing_key().as_verification_key(),
        ]);
        Mock::given(method("GET"))
            .and(path("/common/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&original))
            .up_to_n_times(1)
            .mount(&provider.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/common/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&rotated))
            .mount(&provider.server)
            .await;
        provider
    }

    /// Number of requests the key endpoint has received.
    pub async fn key_fetches(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/common/discovery/v2.0/keys")
            .count()
    }

    /// A provider whose key endpoint is down.
    pub async fn start_with_failing_keys() -> Self {
        let provider = Self::with_discovery().await;
        Mock::given(method("GET"))
            .and(path("/common/discovery/v2.0/keys"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&provider.server)
            .await;
        provider
    }

    async fn with_discovery() -> Self {
        let server = MockServer::start().await;
        let base = server.uri();
        let document = serde_json::json!({
            "issuer": format!("{base}/{{tenantid}}/v2.0"),
            "authorization_endpoint": format!("{base}/common/oauth2/v2.0/authorize"),
            "jwks_uri": format!("{base}/common/discovery/v2.0/keys"),
            "end_session_endpoint": format!("{base}/common/oauth2/v2.0/logout"),
            "response_types_supported": ["code", "id_token", "code id_token", "id_token token"],
            "response_modes_supported": ["query", "fragment", "form_post"],
            "subject_types_supported": ["pairwise"],
            "id_token_signing_alg_values_supported": ["RS256"],
            "scopes_supported": ["openid", "profile", "email"]
        });
        Mock::given(method("GET"))
            .and(path("/common/v2.0/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .mount(&server)
            .await;
        Self { server }
    }

    pub fn authority(&self) -> String {
        format!("{}/common/v2.0", self.server.uri())
    }

    pub fn authorize_path(&self) -> &'static str {
        "/common/oauth2/v2.0/authorize"
    }

    pub fn logout_path(&self) -> &'static str {
        "/common/oauth2/v2.0/logout"
    }

    /// Builds the router against this provider. `extra` adds or overrides
    /// configuration variables.
    pub async fn state(&self, extra: &[(&str, &str)]) -> AppState {
        let authority = self.authority();
        let mut vars: Vec<(String, String)> = vec![
            ("OIDC_CLIENT_ID".into(), CLIENT_ID.into()),
            ("OIDC_AUTHORITY".into(), authority),
            ("OIDC_ALLOWED_TENANTS".into(), MSA_TENANT.into()),
        ];
        vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        let config = AppConfig::from_lookup(|name| {
            vars.iter()
                .rev()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        })
        .expect("config");

        let provider = OidcProvider::discover(
            &config.oidc,
            &config.redirect_uri(),
            reqwest::Client::new(),
        )
        .await
        .expect("discovery");

        AppState::new(config, provider)
    }

    pub async fn app(&self, extra: &[(&str, &str)]) -> Router {
        oidc_signin::app(self.state(extra).await, MemoryStore::default())
    }

    pub fn token(&self, nonce: &str, tenant: &str) -> String {
        sign_token(&signing_key(), &self.server.uri(), nonce, Some(tenant))
    }
}

pub fn sign_token(
    key: &CoreRsaPrivateSigningKey,
    base: &str,
    nonce: &str,
    tenant: Option<&str>,
) -> String {
    let mut extra = ExtraClaims::default();
    if let Some(tenant) = tenant {
        extra.claims.insert("tid".into(), serde_json::json!(tenant));
    }

    let issuer = format!("{base}/{}/v2.0", tenant.unwrap_or("unknown"));
    let now = Utc::now();
    let claims = IdTokenClaims::new(
        IssuerUrl::new(issuer).expect("issuer"),
        vec![Audience::new(CLIENT_ID.to_string())],
        now + Duration::hours(1),
        now,
        StandardClaims::new(SubjectIdentifier::new("user-1".into()))
            .set_preferred_username(Some(EndUserUsername::new("ada".into())))
            .set_email(Some(EndUserEmail::new("ada@example.com".into()))),
        extra,
    )
    .set_nonce(Some(Nonce::new(nonce.to_string())));

    SignInIdToken::new(
        claims,
        key,
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
        None,
        None,
    )
    .expect("signed token")
    .to_string()
}

fn generate_pem() -> String {
    let key = rsa::RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).expect("rsa key");
    key.to_pkcs1_pem(LineEnding::LF).expect("pem").to_string()
}

pub fn signing_key() -> CoreRsaPrivateSigningKey {
    static PEM: OnceLock<String> = OnceLock::new();
    CoreRsaPrivateSigningKey::from_pem(
        PEM.get_or_init(generate_pem),
        Some(JsonWebKeyId::new(KEY_ID.into())),
    )
    .expect("signing key")
}

/// Different key material published under the same key id.
pub fn foreign_signing_key() -> CoreRsaPrivateSigningKey {
    static PEM: OnceLock<String> = OnceLock::new();
    CoreRsaPrivateSigningKey::from_pem(
        PEM.get_or_init(generate_pem),
        Some(JsonWebKeyId::new(KEY_ID.into())),
    )
    .expect("signing key")
}

/// Key material the provider starts publishing after a rotation.
pub fn rotated_signing_key() -> CoreRsaPrivateSigningKey {
    static PEM: OnceLock<String> = OnceLock::new();
    CoreRsaPrivateSigningKey::from_pem(
        PEM.get_or_init(generate_pem),
        Some(JsonWebKeyId::new(ROTATED_KEY_ID.into())),
    )
    .expect("signing key")
}

// --- HTTP helpers ---

pub async fn get(app: &Router, uri: &str, cookie: Option<&str>) -> Response<Body> {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).expect("request"))
        .await
        .expect("response")
}

pub async fn post_form(
    app: &Router,
    uri: &str,
    fields: &[(&str, &str)],
    cookie: Option<&str>,
) -> Response<Body> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    app.clone()
        .oneshot(request.body(Body::from(body)).expect("request"))
        .await
        .expect("response")
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("location header")
        .to_str()
        .expect("location str")
        .to_string()
}

/// The `name=value` part of the session cookie the response sets, if any.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("signin_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .expect("absolute url")
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// A challenge that has been issued but not yet answered.
pub struct Challenge {
    pub cookie: String,
    pub state: String,
    pub nonce: String,
    pub authorize_url: String,
}

pub async fn start_login(app: &Router, uri: &str) -> Challenge {
    start_login_in(app, uri, None).await
}

/// Starts a sign-in within an existing session, as a second tab would.
pub async fn start_login_in(app: &Router, uri: &str, cookie: Option<&str>) -> Challenge {
    let response = get(app, uri, cookie).await;
    let authorize_url = location(&response);
    let cookie = session_cookie(&response)
        .or_else(|| cookie.map(str::to_string))
        .expect("challenge has a session cookie");
    Challenge {
        cookie,
        state: query_param(&authorize_url, "state").expect("state param"),
        nonce: query_param(&authorize_url, "nonce").expect("nonce param"),
        authorize_url,
    }
}
