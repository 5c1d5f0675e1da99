//! Named policies: a policy is the list of requirements guarding an endpoint.

use crate::requirement::{Requirement, RequirementParseError};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy '{policy}': {source}")]
    InvalidRequirement {
        policy: String,
        source: RequirementParseError,
    },
    #[error("policy '{0}' has no requirements")]
    Empty(String),
    #[error("unknown policy '{0}'")]
    Unknown(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRegistry {
    policies: HashMap<String, Vec<Requirement>>,
}

impl PolicyRegistry {
    /// Builds the registry from `name -> ["decision:res#scope", "rpt:res#scope", ..]`.
    pub fn from_definitions(
        definitions: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, PolicyError> {
        let mut registry = Self::default();
        for (name, entries) in definitions {
            let requirements = entries
                .iter()
                .map(|entry| {
                    entry.parse().map_err(|source| PolicyError::InvalidRequirement {
                        policy: name.clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<Requirement>, _>>()?;
            registry.insert(name.clone(), requirements)?;
        }
        Ok(registry)
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        requirements: Vec<Requirement>,
    ) -> Result<(), PolicyError> {
        let name = name.into();
        if requirements.is_empty() {
            return Err(PolicyError::Empty(name));
        }
        self.policies.insert(name, requirements);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&[Requirement], PolicyError> {
        self.policies
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| PolicyError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
