//! Bearer token authentication against the realm's signing keys.

use authz_core::{ClaimsNormalizer, Principal};
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use log::{debug, info, warn};
use reqwest::Client;
use serde_json::Value;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

/// Unknown key ids do not trigger a refetch more often than this
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthnError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("no signing key with id '{0}'")]
    UnknownKey(String),
    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

impl From<jsonwebtoken::errors::Error> for AuthnError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthnError::InvalidToken(err.to_string())
    }
}

struct KeySet {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Verifies RS256 bearer tokens and builds the request [`Principal`].
pub struct Authenticator {
    http: Client,
    jwks_uri: Url,
    issuer: String,
    normalizer: ClaimsNormalizer,
    keys: RwLock<Option<KeySet>>,
    refresh: Mutex<()>,
}

impl Authenticator {
    pub fn new(http: Client, jwks_uri: Url, issuer: String, normalizer: ClaimsNormalizer) -> Self {
        Self {
            http,
            jwks_uri,
            issuer,
            normalizer,
            keys: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Validates signature, issuer, audience and expiry, then normalizes roles.
    pub async fn authenticate(&self, token: &str) -> Result<Principal, AuthnError> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthnError::InvalidToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthnError::InvalidToken("missing key id".to_string()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.normalizer.audience()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let claims = decode::<Value>(token, &key, &validation)?.claims;
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthnError::InvalidToken("sub is not a string".to_string()))?;
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0))
            .ok_or_else(|| AuthnError::InvalidToken("exp is not a timestamp".to_string()))?;

        let roles = self.normalizer.normalize(&claims);
        let principal = Principal::new(subject, roles, token, expires_at);
        debug!("Authenticated {}", principal.claims());
        Ok(principal)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthnError> {
        if let Some(key) = self.find_key(kid)? {
            return Ok(key);
        }

        let _guard = self.refresh.lock().await;
        if let Some(key) = self.find_key(kid)? {
            return Ok(key);
        }
        if self.recently_fetched() {
            return Err(AuthnError::UnknownKey(kid.to_string()));
        }

        self.refresh_keys().await?;
        self.find_key(kid)?
            .ok_or_else(|| AuthnError::UnknownKey(kid.to_string()))
    }

    fn find_key(&self, kid: &str) -> Result<Option<DecodingKey>, AuthnError> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        match keys.as_ref().and_then(|set| set.keys.find(kid)) {
            Some(jwk) => Ok(Some(DecodingKey::from_jwk(jwk)?)),
            None => Ok(None),
        }
    }

    fn recently_fetched(&self) -> bool {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.as_ref()
            .is_some_and(|set| set.fetched_at.elapsed() < MIN_REFRESH_INTERVAL)
    }

    async fn refresh_keys(&self) -> Result<(), AuthnError> {
        let unavailable = |err: reqwest::Error| {
            warn!("Failed to fetch signing keys from {}: {}", self.jwks_uri, err);
            AuthnError::KeysUnavailable(err.to_string())
        };

        let keys: JwkSet = self
            .http
            .get(self.jwks_uri.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;

        info!(
            "Loaded {} signing key(s) from {}",
            keys.keys.len(),
            self.jwks_uri
        );
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = Some(KeySet {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}
