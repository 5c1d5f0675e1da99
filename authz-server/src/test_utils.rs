use crate::config::Settings;
use crate::create_app;
use crate::state::AppState;
use authz_core::{Principal, RoleSet};
use axum::body::Body;
use axum::Router;
use chrono::{Duration, Utc};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use log::LevelFilter;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

pub const TOKEN_PATH: &str = "/realms/test/protocol/openid-connect/token";
pub const JWKS_PATH: &str = "/realms/test/protocol/openid-connect/certs";

/// Key id of the test signing key published by the mock realm
pub const TEST_KID: &str = "test-key";

const SIGNING_KEY: &[u8] = include_bytes!("../testdata/signing_key.pem");
const SIGNING_KEY_MODULUS: &str = "iJn5vpYYhUyAuxcGpsYhUR9d55X6PGFpJMHUnuGUSIYax6PU8JDPmVwcrCzSHwOB1406LRKAQJgwQvdueT5SOCbxTVCvyz9WipjOutytNSCBR00rUAiW3PoxV1m9I0kyYwf2QH1esfx8XjqzyNj0tNaDeXjbJnKmb-C6DGbDz0YWwHfSluJwagg-SKScAmyqWjxR85XElzWoOugpFHti1cLNu43M3TznkUdmC_6k-1Fo1Xb6pjL3iooixAvpeFzd-AKZrCG44MvpSpNkAM5WaxqvJXi3lktuPUUH0UQceI3ot4S82YYwXLgAQwYHlqySCAR5HdcBTaxcldpCXH1QZw";

/// JWKS document publishing the test signing key
pub fn jwks_body() -> Value {
    json!({
        "keys": [{
            "kty": "RSA",
            "kid": TEST_KID,
            "use": "sig",
            "alg": "RS256",
            "n": SIGNING_KEY_MODULUS,
            "e": "AQAB"
        }]
    })
}

/// Signs `claims` with the test key as an RS256 JWT
pub fn mint_token(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(TEST_KID.to_string());
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY).expect("Failed to load signing key");
    encode(&header, claims, &key).expect("Failed to sign token")
}

/// Claims of a user token for the `api` audience, valid for five minutes
pub fn user_claims(issuer: &str, subject: &str, roles: &[&str]) -> Value {
    json!({
        "iss": issuer,
        "sub": subject,
        "aud": "api",
        "exp": (Utc::now() + Duration::minutes(5)).timestamp(),
        "iat": Utc::now().timestamp(),
        "resource_access": {
            "api": { "roles": roles }
        }
    })
}

/// Test fixture wiring the application against a mocked Keycloak realm.
///
/// The realm's JWKS is mounted up front. Service token and decision
/// responses are mounted per test so their call counts can be asserted.
///
/// ```rust,ignore
/// let fixture = TestFixture::new().await;
/// fixture.mount_service_token(1).await;
/// fixture.mount_decision(true, 1).await;
///
/// let token = fixture.token_for("user-1", &["customer-reader"]);
/// fixture.get_as("/customers", &token).await.assert_ok();
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// State shared with the router
    pub state: AppState,
    /// Configuration settings
    pub settings: Settings,
    /// Mock server for the Keycloak realm
    pub keycloak_mock: MockServer,
}

impl TestFixture {
    pub async fn new() -> Self {
        let keycloak_mock = MockServer::start().await;
        let settings = Settings::for_test_with_mocks(&keycloak_mock);
        Self::with_settings(keycloak_mock, settings).await
    }

    /// Builds the fixture from settings already pointing at `keycloak_mock`
    pub async fn with_settings(keycloak_mock: MockServer, settings: Settings) -> Self {
        Self::setup_logger(LevelFilter::Debug);

        Mock::given(matchers::method("GET"))
            .and(matchers::path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()))
            .mount(&keycloak_mock)
            .await;

        let state = AppState::new(&settings)
            .await
            .expect("Failed to create application state");
        let app = create_app(state.clone()).await;

        Self {
            app,
            state,
            settings,
            keycloak_mock,
        }
    }

    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    pub fn issuer(&self) -> String {
        format!("{}/realms/test", self.keycloak_mock.uri())
    }

    /// Signed user token for the mock realm
    pub fn token_for(&self, subject: &str, roles: &[&str]) -> String {
        mint_token(&user_claims(&self.issuer(), subject, roles))
    }

    /// Principal as the authentication middleware would build it
    pub fn principal_for(&self, subject: &str, roles: &[&str]) -> Principal {
        let token = self.token_for(subject, roles);
        Principal::new(
            subject,
            roles.iter().copied().collect::<RoleSet>(),
            token,
            Utc::now() + Duration::minutes(5),
        )
    }

    /// Mounts the client credentials grant
    pub async fn mount_service_token(&self, expected_calls: u64) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(TOKEN_PATH))
            .and(matchers::body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "service-token",
                "token_type": "Bearer",
                "expires_in": 300
            })))
            .expect(expected_calls)
            .mount(&self.keycloak_mock)
            .await;
    }

    /// Mounts a UMA decision answering allow or `access_denied`
    pub async fn mount_decision(&self, allow: bool, expected_calls: u64) {
        let response = if allow {
            ResponseTemplate::new(200).set_body_json(json!({"result": true}))
        } else {
            ResponseTemplate::new(403).set_body_json(json!({
                "error": "access_denied",
                "error_description": "not_authorized"
            }))
        };
        self.mount_decision_response(response, expected_calls).await;
    }

    pub async fn mount_decision_response(&self, response: ResponseTemplate, expected_calls: u64) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(TOKEN_PATH))
            .and(matchers::body_string_contains("response_mode=decision"))
            .respond_with(response)
            .expect(expected_calls)
            .mount(&self.keycloak_mock)
            .await;
    }

    /// Sends an unauthenticated GET request
    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri.as_ref())
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a GET request carrying `token` as bearer credentials
    pub async fn get_as(&self, uri: impl AsRef<str>, token: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri.as_ref())
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        // Try to parse as JSON, defaulting to empty object if parsing fails or empty body
        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| json!({}))
        } else {
            json!({})
        };

        TestResponse {
            status,
            headers,
            json,
        }
    }
}

/// Response from a test request that provides convenient access to status and JSON body.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Response body as JSON (if present and valid JSON)
    pub json: Value,
}

impl TestResponse {
    /// Panics if the status code doesn't match the expected value.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {} but got {} with body: {}",
            expected,
            self.status,
            serde_json::to_string_pretty(&self.json).unwrap_or_default()
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Panics if deserialization fails.
    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to deserialize response JSON")
    }
}
