use authz_core::{CacheOptions, CacheStore};
use confique::Config;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the TOML configuration file
pub const CONFIG_FILE_ENV: &str = "AUTHZ_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "authz.toml";

/// Policy protecting the customers endpoints
pub const CUSTOMERS_READ_POLICY: &str = "customers#read";

/// Main configuration structure for the authorization server
#[derive(Debug, Config, Clone)]
pub struct Settings {
    /// The port the server will listen to (default: 8080)
    #[config(env = "AUTHZ_PORT", default = 8080)]
    pub port: u16,

    /// Keycloak realm configuration
    #[config(nested)]
    pub keycloak: KeycloakConfig,

    /// Decision cache configuration
    #[config(nested)]
    pub cache: CacheConfig,

    /// Policy name to requirement list, e.g.
    /// `"customers#read" = ["decision:customers#read"]` (file only)
    pub policies: Option<BTreeMap<String, Vec<String>>>,
}

/// Keycloak realm acting as identity provider and policy decision point
#[derive(Debug, Config, Clone)]
pub struct KeycloakConfig {
    /// Realm URL, also the expected token issuer
    #[config(
        env = "AUTHZ_KEYCLOAK_AUTHORITY",
        default = "http://localhost:8180/realms/master"
    )]
    pub authority: String,

    /// Audience required in bearer tokens and sent with UMA requests
    #[config(env = "AUTHZ_KEYCLOAK_AUDIENCE", default = "api")]
    pub audience: String,

    /// Confidential client used for the service token
    #[config(env = "AUTHZ_KEYCLOAK_CLIENT_ID", default = "api")]
    pub client_id: String,

    #[config(env = "AUTHZ_KEYCLOAK_CLIENT_SECRET", default = "")]
    pub client_secret: String,

    /// Timeout for authorization server requests in seconds (default: 5)
    #[config(env = "AUTHZ_KEYCLOAK_REQUEST_TIMEOUT", default = 5)]
    pub request_timeout: u64,

    /// Seconds before expiry at which the service token is refreshed (default: 30)
    #[config(env = "AUTHZ_KEYCLOAK_TOKEN_SAFETY_MARGIN", default = 30)]
    pub token_safety_margin: u64,

    /// Also map `realm_access.roles` onto the principal
    #[config(env = "AUTHZ_KEYCLOAK_INCLUDE_REALM_ROLES", default = false)]
    pub include_realm_roles: bool,
}

impl KeycloakConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn token_safety_margin(&self) -> Duration {
        Duration::from_secs(self.token_safety_margin)
    }
}

/// Configuration for the decision cache
#[derive(Debug, Config, Clone)]
pub struct CacheConfig {
    /// Decision TTL in seconds (default: 30)
    #[config(env = "AUTHZ_CACHE_TTL", default = 30)]
    pub ttl: u64,

    /// Cache store type: "in-memory", "redis" or "none"
    #[config(env = "AUTHZ_CACHE_STORE", default = "in-memory")]
    pub store: CacheStore,

    #[config(nested)]
    pub memory: InMemoryConfig,

    #[config(nested)]
    pub redis: RedisConfig,
}

/// In-memory cache configuration options
#[derive(Debug, Config, Clone)]
pub struct InMemoryConfig {
    /// Maximum number of cached decisions (default: 10000)
    #[config(env = "AUTHZ_CACHE_MEMORY_CAPACITY", default = 10000)]
    pub capacity: u64,
}

/// Redis cache configuration options
#[derive(Debug, Config, Clone)]
pub struct RedisConfig {
    /// Redis connection string
    #[config(env = "AUTHZ_CACHE_REDIS_URL", default = "")]
    pub url: String,
}

impl CacheConfig {
    pub fn options(&self) -> CacheOptions {
        CacheOptions {
            store: self.store,
            ttl: Duration::from_secs(self.ttl),
            memory_capacity: self.memory.capacity,
            redis_url: self.redis.url.clone(),
        }
    }
}

impl Settings {
    /// Loads the configuration file named by `AUTHZ_CONFIG_FILE` (default
    /// `authz.toml`), overlaid by `AUTHZ_*` environment variables.
    pub fn new() -> Result<Self, confique::Error> {
        let path = std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::load(Path::new(&path))
    }

    /// Environment variables win over the file; a missing file is ignored.
    pub fn load(path: &Path) -> Result<Self, confique::Error> {
        Settings::builder().env().file(path).load()
    }

    /// Configured policies, or the built-in customers policy
    pub fn policy_definitions(&self) -> BTreeMap<String, Vec<String>> {
        self.policies.clone().unwrap_or_else(|| {
            BTreeMap::from([(
                CUSTOMERS_READ_POLICY.to_string(),
                vec![format!("decision:{CUSTOMERS_READ_POLICY}")],
            )])
        })
    }

    #[cfg(test)]
    pub fn for_test_with_mocks(keycloak_mock: &wiremock::MockServer) -> Self {
        Self {
            port: 0, // Let the OS choose a port
            keycloak: KeycloakConfig {
                authority: format!("{}/realms/test", keycloak_mock.uri()),
                audience: "api".to_string(),
                client_id: "api".to_string(),
                client_secret: "secret".to_string(),
                request_timeout: 1,
                token_safety_margin: 30,
                include_realm_roles: false,
            },
            cache: CacheConfig {
                ttl: 60,
                store: CacheStore::InMemory,
                memory: InMemoryConfig { capacity: 1000 },
                redis: RedisConfig { url: String::new() },
            },
            policies: None,
        }
    }
}
