//! Service token acquisition (OAuth 2.0 client credentials grant).

use crate::error::AuthzError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, warn};
use reqwest::Client;
use serde::Deserialize;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// Only one retry is attempted after a failed token request.
const MAX_RETRIES: u32 = 1;
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(200);
/// Used when the token endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN: u64 = 60;
/// Longer lifetimes are clamped; the token is simply refreshed earlier
const MAX_EXPIRES_IN: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Access token the resource server uses to authenticate itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ServiceToken {
    fn new(value: String, expires_in: u64) -> Self {
        let issued_at = Utc::now();
        let lifetime = ChronoDuration::seconds(expires_in.min(MAX_EXPIRES_IN) as i64);
        Self {
            value,
            issued_at,
            expires_at: issued_at + lifetime,
        }
    }

    /// The safety margin never exceeds half the token lifetime, so short-lived
    /// tokens are still reused.
    fn is_fresh(&self, now: DateTime<Utc>, safety_margin: ChronoDuration) -> bool {
        let half_lifetime = (self.expires_at - self.issued_at) / 2;
        now < self.expires_at - safety_margin.min(half_lifetime)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Error body of an OAuth 2.0 endpoint (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
pub(crate) struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorBody {
    pub(crate) fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    pub(crate) fn describe(&self) -> String {
        match &self.error_description {
            Some(description) => format!("{}: {}", self.error, description),
            None => self.error.clone(),
        }
    }
}

/// Obtains and caches the service token.
///
/// Readers take a short read lock on the current token. Refreshes are
/// serialized by `refresh`, so concurrent callers that find the token stale
/// wait for the one outbound request instead of issuing their own.
pub struct TokenAcquirer {
    http: Client,
    token_url: Url,
    credentials: ClientCredentials,
    safety_margin: ChronoDuration,
    retry_base: Duration,
    current: RwLock<Option<ServiceToken>>,
    refresh: Mutex<()>,
}

impl TokenAcquirer {
    pub fn new(
        http: Client,
        token_url: Url,
        credentials: ClientCredentials,
        safety_margin: Duration,
    ) -> Self {
        Self {
            http,
            token_url,
            credentials,
            safety_margin: ChronoDuration::from_std(safety_margin)
                .unwrap_or_else(|_| ChronoDuration::seconds(30)),
            retry_base: DEFAULT_RETRY_BASE,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Overrides the initial retry backoff (default 200ms)
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    /// Returns a valid service token, fetching a new one when needed.
    pub async fn acquire(&self) -> Result<ServiceToken, AuthzError> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = self.cached() {
            debug!("Service token refreshed by a concurrent caller");
            return Ok(token);
        }

        let token = self.fetch_with_retry().await?;
        self.store(Some(token.clone()));
        debug!("Acquired service token valid until {}", token.expires_at);
        Ok(token)
    }

    /// Drops the cached token so the next `acquire` fetches a new one
    pub fn invalidate(&self) {
        self.store(None);
    }

    fn cached(&self) -> Option<ServiceToken> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current
            .as_ref()
            .filter(|token| token.is_fresh(Utc::now(), self.safety_margin))
            .cloned()
    }

    fn store(&self, token: Option<ServiceToken>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    async fn fetch_with_retry(&self) -> Result<ServiceToken, AuthzError> {
        let mut delay = self.retry_base;
        let mut attempt = 0;
        loop {
            match self.fetch().await {
                Ok(token) => return Ok(token),
                Err(AuthzError::InvalidCredentials(reason)) => {
                    error!("Token endpoint rejected the client credentials: {}", reason);
                    return Err(AuthzError::InvalidCredentials(reason));
                }
                Err(err) if attempt < MAX_RETRIES => {
                    warn!(
                        "Service token request failed ({}), retrying in {:?}",
                        err, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        "Service token request failed after {} attempts: {}",
                        attempt + 1,
                        err
                    );
                    return Err(AuthzError::AuthServerUnreachable(err.to_string()));
                }
            }
        }
    }

    async fn fetch(&self) -> Result<ServiceToken, AuthzError> {
        debug!("Requesting service token from {}", self.token_url);
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: TokenResponse = response.json().await?;
            let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
            return Ok(ServiceToken::new(body.access_token, expires_in));
        }

        let body = response.text().await.unwrap_or_default();
        let oauth_error = OAuthErrorBody::parse(&body);
        let rejected_client = oauth_error
            .as_ref()
            .is_some_and(|e| e.error == "invalid_client" || e.error == "unauthorized_client");

        if status == reqwest::StatusCode::UNAUTHORIZED || rejected_client {
            let reason = oauth_error
                .map(|e| e.describe())
                .unwrap_or_else(|| status.to_string());
            return Err(AuthzError::InvalidCredentials(reason));
        }

        Err(AuthzError::AuthServerError {
            status: Some(status.as_u16()),
            message: oauth_error
                .map(|e| e.describe())
                .unwrap_or_else(|| "token request failed".to_string()),
        })
    }
}
