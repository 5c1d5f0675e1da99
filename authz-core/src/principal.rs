use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Claim type under which normalized roles are exposed.
pub const ROLE_CLAIM_TYPE: &str = "role";

/// Ordered set of unique role names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<String>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.contains(role)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Re-encodes the set in the Keycloak client-role shape for `audience`.
    pub fn to_claims(&self, audience: &str) -> serde_json::Value {
        serde_json::json!({
            "resource_access": {
                audience: { "roles": self.0.iter().collect::<Vec<_>>() }
            }
        })
    }
}

impl<S: Into<String>> FromIterator<S> for RoleSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Authenticated caller of a single request.
///
/// Built once authentication and claims normalization are done; the role set
/// cannot change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    subject: String,
    roles: RoleSet,
    token: String,
    expires_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(
        subject: impl Into<String>,
        roles: RoleSet,
        token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject: subject.into(),
            roles,
            token: token.into(),
            expires_at,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Raw bearer token the principal authenticated with
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Normalized identity: the subject plus its roles under [`ROLE_CLAIM_TYPE`].
    pub fn claims(&self) -> serde_json::Value {
        let mut claims = serde_json::Map::new();
        claims.insert("sub".to_string(), serde_json::json!(self.subject));
        claims.insert(
            ROLE_CLAIM_TYPE.to_string(),
            serde_json::json!(self.roles.iter().collect::<Vec<_>>()),
        );
        serde_json::Value::Object(claims)
    }
}
