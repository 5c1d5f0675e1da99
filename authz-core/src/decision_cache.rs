//! TTL-bounded decision memoization with single-flight evaluation.
//!
//! Every key has at most one evaluation in flight. The evaluation runs in its
//! own task and publishes its outcome over a `watch` channel, so a caller that
//! gives up waiting never cancels the work the other waiters depend on.

use crate::cache::{Cache, CacheBackend};
use crate::error::AuthzError;
use crate::requirement::{Decision, DecisionKey, Verdict};
use chrono::Utc;
use log::{debug, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

type Outcome = Option<Result<Decision, AuthzError>>;
type InFlight = Arc<Mutex<HashMap<DecisionKey, watch::Receiver<Outcome>>>>;

/// Where a looked-up decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    /// A live entry was already stored
    Cached,
    /// This caller started the evaluation
    Evaluated,
    /// This caller joined an evaluation started by someone else
    Coalesced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub decision: Decision,
    pub source: LookupSource,
}

impl Lookup {
    pub fn verdict(&self) -> Verdict {
        self.decision.verdict
    }
}

#[derive(Clone)]
pub struct DecisionCache {
    store: Arc<dyn CacheBackend>,
    ttl: Duration,
    in_flight: InFlight,
}

impl DecisionCache {
    pub fn new(store: Cache, ttl: Duration) -> Self {
        Self::with_backend(Arc::new(store), ttl)
    }

    pub fn with_backend(store: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn health_check(&self) -> Result<(), String> {
        self.store.health_check().await
    }

    /// Returns the live decision for `key`, evaluating it when missing.
    ///
    /// `evaluate` only runs when this caller leads a new evaluation. Failures
    /// are delivered to every waiter and never stored.
    pub async fn get_or_evaluate<F, Fut>(
        &self,
        key: DecisionKey,
        evaluate: F,
    ) -> Result<Lookup, AuthzError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Verdict, AuthzError>> + Send + 'static,
    {
        if let Some(decision) = live_entry(self.store.as_ref(), &key).await {
            debug!("Decision cache hit for {}", key);
            return Ok(Lookup {
                decision,
                source: LookupSource::Cached,
            });
        }

        let (mut receiver, source) = self.join_or_start(key.clone(), evaluate);
        if source == LookupSource::Coalesced {
            debug!("Joining in-flight evaluation for {}", key);
        }

        let outcome: Outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| AuthzError::EvaluationAborted)?
            .clone();

        match outcome {
            Some(Ok(decision)) => Ok(Lookup { decision, source }),
            Some(Err(err)) => Err(err),
            None => Err(AuthzError::EvaluationAborted),
        }
    }

    fn join_or_start<F, Fut>(
        &self,
        key: DecisionKey,
        evaluate: F,
    ) -> (watch::Receiver<Outcome>, LookupSource)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Verdict, AuthzError>> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(receiver) = in_flight.get(&key) {
            return (receiver.clone(), LookupSource::Coalesced);
        }

        debug!("Decision cache miss for {}, evaluating", key);
        let (sender, receiver) = watch::channel(None);
        in_flight.insert(key.clone(), receiver.clone());
        drop(in_flight);

        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            key: key.clone(),
            sender,
        };
        let store = self.store.clone();
        let ttl = self.ttl;

        tokio::spawn(async move {
            // Another evaluation may have finished between our miss and the spawn
            let outcome = match live_entry(store.as_ref(), &key).await {
                Some(decision) => Ok(decision),
                None => match evaluate().await {
                    Ok(verdict) => {
                        let decision = Decision::new(verdict, ttl);
                        // Decisions keep whole seconds; a sub-second entry is born expired
                        if decision.ttl > 0 {
                            if let Err(err) = store.set(&key, &decision).await {
                                warn!("Failed to store decision for {}: {}", key, err);
                            }
                        }
                        Ok(decision)
                    }
                    Err(err) => {
                        debug!("Evaluation failed for {}: {}", key, err);
                        Err(err)
                    }
                },
            };

            // Nobody listening is fine, the stored entry still serves later callers
            let _ = guard.sender.send(Some(outcome));
        });

        (receiver, LookupSource::Evaluated)
    }
}

/// Reads a stored decision, treating expired entries and store failures as misses.
async fn live_entry(store: &dyn CacheBackend, key: &DecisionKey) -> Option<Decision> {
    match store.get(key).await {
        Ok(Some(decision)) if !decision.is_expired(Utc::now()) => Some(decision),
        Ok(_) => None,
        Err(err) => {
            warn!("Decision cache read failed for {}: {}", key, err);
            None
        }
    }
}

/// Owns the publishing side of one evaluation.
///
/// The map slot is released before the sender is dropped, so a late caller
/// never joins a channel that will not publish, even when the evaluation panics.
struct InFlightGuard {
    in_flight: InFlight,
    key: DecisionKey,
    sender: watch::Sender<Outcome>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
