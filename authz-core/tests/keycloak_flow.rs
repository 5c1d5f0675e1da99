use authz_core::{
    Cache, CacheOptions, ClientCredentials, DecisionCache, KeycloakEvaluator, KeycloakRealm,
    PolicyGate, Principal, Requirement, RoleSet, TokenAcquirer, Verdict, build_http_client,
    create_cache,
};
use chrono::Utc;
use log::LevelFilter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/realms/shop/protocol/openid-connect/token";

async fn setup_gate(server: &MockServer) -> PolicyGate {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Debug)
        .is_test(true)
        .try_init();

    let realm = KeycloakRealm::new(&format!("{}/realms/shop", server.uri())).unwrap();
    let token_endpoint = realm.token_endpoint().unwrap();
    let http = build_http_client(Duration::from_secs(2)).unwrap();
    let tokens = Arc::new(TokenAcquirer::new(
        http.clone(),
        token_endpoint.clone(),
        ClientCredentials {
            client_id: "api".to_string(),
            client_secret: "secret".to_string(),
        },
        Duration::from_secs(30),
    ));
    let evaluator = Arc::new(KeycloakEvaluator::new(http, token_endpoint, "api", tokens));

    let options = CacheOptions::default();
    let cache: Cache = create_cache(&options).await.unwrap();
    PolicyGate::new(evaluator, DecisionCache::new(cache, options.ttl))
}

fn principal(subject: &str) -> Principal {
    Principal::new(
        subject,
        RoleSet::new(),
        format!("token-of-{subject}"),
        Utc::now(),
    )
}

async fn mount_service_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "service-token", "expires_in": 300}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_concurrent_evaluations_share_one_service_token_request() {
    let server = MockServer::start().await;
    mount_service_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("response_mode=decision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
        .expect(10)
        .mount(&server)
        .await;

    let gate = setup_gate(&server).await;
    let policy: Vec<Requirement> = vec!["decision:customers#read".parse().unwrap()];

    let mut handles = Vec::new();
    for i in 0..10 {
        let gate = gate.clone();
        let policy = policy.clone();
        handles.push(tokio::spawn(async move {
            gate.authorize(&principal(&format!("user-{i}")), &policy)
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_allowed());
    }
    server.verify().await;
}

#[tokio::test]
async fn test_denied_decision_is_cached() {
    let server = MockServer::start().await;
    mount_service_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("response_mode=decision"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "access_denied",
            "error_description": "not_authorized"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gate = setup_gate(&server).await;
    let policy: Vec<Requirement> = vec!["decision:customers#read".parse().unwrap()];

    let first = gate.authorize(&principal("user-1"), &policy).await;
    assert_eq!(first.verdict, Verdict::Deny);
    assert!(first.fatal_error().is_none());

    let second = gate.authorize(&principal("user-1"), &policy).await;
    assert_eq!(second.verdict, Verdict::Deny);
    assert!(second.evaluations[0].from_cache());
    server.verify().await;
}

#[tokio::test]
async fn test_outage_is_reported_and_not_cached() {
    let server = MockServer::start().await;
    mount_service_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("response_mode=decision"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let gate = setup_gate(&server).await;
    let policy: Vec<Requirement> = vec!["decision:customers#read".parse().unwrap()];

    for _ in 0..2 {
        let authorization = gate.authorize(&principal("user-1"), &policy).await;
        assert_eq!(authorization.verdict, Verdict::Deny);
        assert!(authorization.fatal_error().is_some());
    }
    server.verify().await;
}
