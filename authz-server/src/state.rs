use crate::authn::Authenticator;
use crate::config::Settings;
use crate::models::CustomerDirectory;
use authz_core::{
    build_http_client, create_cache, AuthzError, Cache, CacheError, ClaimsNormalizer,
    ClientCredentials, DecisionCache, KeycloakEvaluator, KeycloakRealm, PolicyError,
    PolicyGate, PolicyRegistry, TokenAcquirer,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Invalid Keycloak authority: {0}")]
    Authority(#[from] url::ParseError),
    #[error("Failed to create cache: {0}")]
    Cache(#[from] CacheError),
    #[error("Invalid policy configuration: {0}")]
    Policy(#[from] PolicyError),
    #[error("Failed to create HTTP client: {0}")]
    Http(#[from] AuthzError),
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub gate: PolicyGate,
    pub policies: Arc<PolicyRegistry>,
    pub authenticator: Arc<Authenticator>,
    pub customers: Arc<CustomerDirectory>,
}

impl AppState {
    pub async fn new(settings: &Settings) -> Result<Self, StateError> {
        let cache = create_cache(&settings.cache.options()).await?;
        Self::with_cache(settings, cache)
    }

    /// Builds the state around an already connected cache store
    pub fn with_cache(settings: &Settings, cache: Cache) -> Result<Self, StateError> {
        let keycloak = &settings.keycloak;
        let realm = KeycloakRealm::new(&keycloak.authority)?;
        let token_endpoint = realm.token_endpoint()?;

        // One pooled client for the token, decision and JWKS endpoints
        let http = build_http_client(keycloak.request_timeout())?;

        let tokens = Arc::new(TokenAcquirer::new(
            http.clone(),
            token_endpoint.clone(),
            ClientCredentials {
                client_id: keycloak.client_id.clone(),
                client_secret: keycloak.client_secret.clone(),
            },
            keycloak.token_safety_margin(),
        ));
        let evaluator = Arc::new(KeycloakEvaluator::new(
            http.clone(),
            token_endpoint,
            keycloak.audience.clone(),
            tokens,
        ));
        let decisions = DecisionCache::new(cache, settings.cache.options().ttl);

        let normalizer = ClaimsNormalizer::new(keycloak.audience.clone())
            .with_realm_roles(keycloak.include_realm_roles);
        let authenticator = Authenticator::new(
            http,
            realm.jwks_uri()?,
            realm.issuer().to_string(),
            normalizer,
        );

        let policies = PolicyRegistry::from_definitions(&settings.policy_definitions())?;

        Ok(Self {
            settings: Arc::new(settings.clone()),
            gate: PolicyGate::new(evaluator, decisions),
            policies: Arc::new(policies),
            authenticator: Arc::new(authenticator),
            customers: Arc::new(CustomerDirectory::default()),
        })
    }

    /// Check if all components are healthy
    pub async fn health_check(&self) -> bool {
        match self.gate.cache().health_check().await {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Decision cache is unhealthy: {}", err);
                false
            }
        }
    }
}
