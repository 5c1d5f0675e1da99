//! AND-combination of the requirements attached to a protected endpoint.

use crate::client::PermissionEvaluator;
use crate::decision_cache::{DecisionCache, LookupSource};
use crate::error::AuthzError;
use crate::principal::Principal;
use crate::requirement::{Requirement, Verdict};
use log::{debug, warn};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationState {
    Pending,
    Resolved {
        verdict: Verdict,
        source: LookupSource,
    },
    Failed(AuthzError),
}

/// Outcome of one requirement within an authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub requirement: Requirement,
    pub state: EvaluationState,
}

impl Evaluation {
    fn pending(requirement: Requirement) -> Self {
        Self {
            requirement,
            state: EvaluationState::Pending,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(
            self.state,
            EvaluationState::Resolved {
                verdict: Verdict::Allow,
                ..
            }
        )
    }

    pub fn from_cache(&self) -> bool {
        matches!(
            self.state,
            EvaluationState::Resolved {
                source: LookupSource::Cached,
                ..
            }
        )
    }

    pub fn error(&self) -> Option<&AuthzError> {
        match &self.state {
            EvaluationState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub verdict: Verdict,
    pub evaluations: Vec<Evaluation>,
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        self.verdict.is_allow()
    }

    pub fn failures(&self) -> impl Iterator<Item = &AuthzError> {
        self.evaluations.iter().filter_map(Evaluation::error)
    }

    /// First failure that should not be answered as a plain denial
    pub fn fatal_error(&self) -> Option<&AuthzError> {
        self.failures().find(|err| !err.is_transient())
    }
}

/// Evaluates requirements through the decision cache.
#[derive(Clone)]
pub struct PolicyGate {
    evaluator: Arc<dyn PermissionEvaluator>,
    cache: DecisionCache,
}

impl PolicyGate {
    pub fn new(evaluator: Arc<dyn PermissionEvaluator>, cache: DecisionCache) -> Self {
        Self { evaluator, cache }
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    /// Evaluates every requirement concurrently; ALLOW only if all of them allow.
    ///
    /// All requirements run to completion even once a DENY is known, so every
    /// failure is reported. Dropping the returned future stops waiting but
    /// leaves shared evaluations running.
    pub async fn authorize(
        &self,
        principal: &Principal,
        requirements: &[Requirement],
    ) -> Authorization {
        let mut evaluations: Vec<Evaluation> = requirements
            .iter()
            .cloned()
            .map(Evaluation::pending)
            .collect();

        let mut tasks = JoinSet::new();
        for (index, requirement) in requirements.iter().enumerate() {
            let key = requirement.key_for(principal.subject());
            let cache = self.cache.clone();
            let evaluator = self.evaluator.clone();
            let token = principal.token().to_string();
            let requirement = requirement.clone();

            tasks.spawn(async move {
                let lookup = cache
                    .get_or_evaluate(key, move || async move {
                        evaluator.evaluate(&token, &requirement).await
                    })
                    .await;
                (index, lookup)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(lookup))) => {
                    evaluations[index].state = EvaluationState::Resolved {
                        verdict: lookup.verdict(),
                        source: lookup.source,
                    };
                }
                Ok((index, Err(err))) => {
                    evaluations[index].state = EvaluationState::Failed(err);
                }
                Err(err) => warn!("Requirement task ended abnormally: {}", err),
            }
        }

        for evaluation in &mut evaluations {
            if evaluation.state == EvaluationState::Pending {
                evaluation.state = EvaluationState::Failed(AuthzError::EvaluationAborted);
            }
        }

        for evaluation in &evaluations {
            if let Some(err) = evaluation.error() {
                warn!(
                    "Requirement {} failed for {}: {}",
                    evaluation.requirement,
                    principal.subject(),
                    err
                );
            }
        }

        let verdict = Verdict::from(evaluations.iter().all(Evaluation::is_allow));
        debug!(
            "Authorization for {} over {} requirement(s): {:?}",
            principal.subject(),
            evaluations.len(),
            verdict
        );

        Authorization {
            verdict,
            evaluations,
        }
    }
}
