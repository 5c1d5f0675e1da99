use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequirementParseError {
    #[error("permission '{0}' must have the form <resource>#<scope>")]
    InvalidPermission(String),
    #[error("unknown requirement kind '{0}', expected 'decision' or 'rpt'")]
    UnknownKind(String),
}

/// A `resource#scope` pair as understood by the authorization server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub scope: String,
}

impl Permission {
    pub fn new(resource: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.resource, self.scope)
    }
}

impl FromStr for Permission {
    type Err = RequirementParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('#') {
            Some((resource, scope))
                if !resource.is_empty() && !scope.is_empty() && !scope.contains('#') =>
            {
                Ok(Permission::new(resource, scope))
            }
            _ => Err(RequirementParseError::InvalidPermission(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementKind {
    Decision,
    Rpt,
}

/// One unit of authorization attached to a policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// The decision endpoint must answer ALLOW for the permission
    Decision(Permission),
    /// An RPT must be issued and must embed the permission
    Rpt(Permission),
}

impl Requirement {
    pub fn decision(resource: impl Into<String>, scope: impl Into<String>) -> Self {
        Requirement::Decision(Permission::new(resource, scope))
    }

    pub fn rpt(resource: impl Into<String>, scope: impl Into<String>) -> Self {
        Requirement::Rpt(Permission::new(resource, scope))
    }

    pub fn kind(&self) -> RequirementKind {
        match self {
            Requirement::Decision(_) => RequirementKind::Decision,
            Requirement::Rpt(_) => RequirementKind::Rpt,
        }
    }

    pub fn permission(&self) -> &Permission {
        match self {
            Requirement::Decision(permission) | Requirement::Rpt(permission) => permission,
        }
    }

    /// Cache key of this requirement for the given subject
    pub fn key_for(&self, subject: &str) -> DecisionKey {
        let permission = self.permission();
        DecisionKey {
            subject: subject.to_string(),
            resource: permission.resource.clone(),
            scope: permission.scope.clone(),
            kind: self.kind(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Decision(permission) => write!(f, "decision:{permission}"),
            Requirement::Rpt(permission) => write!(f, "rpt:{permission}"),
        }
    }
}

/// Parses `decision:<resource>#<scope>` or `rpt:<resource>#<scope>`.
/// A bare `<resource>#<scope>` is a decision requirement.
impl FromStr for Requirement {
    type Err = RequirementParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            Some(("decision", permission)) => Ok(Requirement::Decision(permission.parse()?)),
            Some(("rpt", permission)) => Ok(Requirement::Rpt(permission.parse()?)),
            Some((kind, _)) => Err(RequirementParseError::UnknownKind(kind.to_string())),
            None => Ok(Requirement::Decision(s.parse()?)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_allow(self) -> bool {
        self == Verdict::Allow
    }
}

impl From<bool> for Verdict {
    fn from(allowed: bool) -> Self {
        if allowed { Verdict::Allow } else { Verdict::Deny }
    }
}

/// Result of evaluating one requirement for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub evaluated_at: DateTime<Utc>,
    /// Lifetime in seconds
    pub ttl: u64,
}

impl Decision {
    pub fn new(verdict: Verdict, ttl: std::time::Duration) -> Self {
        Self {
            verdict,
            evaluated_at: Utc::now(),
            ttl: ttl.as_secs(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.evaluated_at + Duration::seconds(self.ttl.min(u32::MAX as u64) as i64)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Seconds left before expiry, zero once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at() - now).num_seconds().max(0) as u64
    }
}

/// Identity of a cache entry: who asked for what, and how.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionKey {
    pub subject: String,
    pub resource: String,
    pub scope: String,
    pub kind: RequirementKind,
}

impl fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RequirementKind::Decision => "decision",
            RequirementKind::Rpt => "rpt",
        };
        write!(f, "{}:{}#{}@{}", kind, self.resource, self.scope, self.subject)
    }
}
