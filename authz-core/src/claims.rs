//! Keycloak role claims normalization.
//!
//! Keycloak nests client roles per audience (`resource_access.<client>.roles`)
//! and realm roles under `realm_access.roles`. Consumers only care about a flat
//! set of role names, exposed under [`ROLE_CLAIM_TYPE`](crate::ROLE_CLAIM_TYPE).

use crate::principal::RoleSet;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ClaimsNormalizer {
    audience: String,
    include_realm_roles: bool,
}

impl ClaimsNormalizer {
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            include_realm_roles: false,
        }
    }

    /// Also collect `realm_access.roles`
    pub fn with_realm_roles(mut self, include: bool) -> Self {
        self.include_realm_roles = include;
        self
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Flattens the role claims of a decoded token.
    ///
    /// A missing or oddly shaped claim yields an empty set, never an error.
    pub fn normalize(&self, claims: &Value) -> RoleSet {
        let client_roles = claims
            .get("resource_access")
            .and_then(|access| access.get(&self.audience))
            .and_then(|client| client.get("roles"));

        let realm_roles = if self.include_realm_roles {
            claims
                .get("realm_access")
                .and_then(|access| access.get("roles"))
        } else {
            None
        };

        client_roles
            .into_iter()
            .chain(realm_roles)
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .collect()
    }
}
