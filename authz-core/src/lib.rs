//! # authz-core
//!
//! Runtime authorization decisions against a Keycloak realm.
//!
//! ## Components
//!
//! - **Token Acquirer:** client-credentials service token with single-flight refresh.
//! - **Claims Normalizer:** flattens Keycloak role claims into a [`RoleSet`].
//! - **Permission Decision Client:** UMA decision and RPT calls to the token endpoint.
//! - **Decision Cache:** TTL-bounded verdicts, one in-flight evaluation per key.
//! - **Policy Gate:** AND-combination of the requirements guarding an endpoint.

pub mod cache;
pub mod claims;
pub mod client;
pub mod decision_cache;
pub mod error;
pub mod gate;
pub mod policy;
pub mod principal;
pub mod requirement;
pub mod token;

pub use cache::{Cache, CacheBackend, CacheError, CacheOptions, CacheStore, create_cache};
pub use claims::ClaimsNormalizer;
pub use client::{KeycloakEvaluator, KeycloakRealm, PermissionEvaluator, build_http_client};
pub use decision_cache::{DecisionCache, Lookup, LookupSource};
pub use error::AuthzError;
pub use gate::{Authorization, Evaluation, EvaluationState, PolicyGate};
pub use policy::{PolicyError, PolicyRegistry};
pub use principal::{Principal, ROLE_CLAIM_TYPE, RoleSet};
pub use requirement::{
    Decision, DecisionKey, Permission, Requirement, RequirementKind, RequirementParseError,
    Verdict,
};
pub use token::{ClientCredentials, ServiceToken, TokenAcquirer};
