//! Permission decision client for Keycloak's UMA grant.
//!
//! Both modes post `grant_type=urn:ietf:params:oauth:grant-type:uma-ticket`
//! to the realm token endpoint:
//! - decision mode adds `response_mode=decision` and answers `{"result": bool}`,
//! - RPT mode answers with a Requesting Party Token whose
//!   `authorization.permissions` claim lists what was granted.
//!
//! No retries happen here; the decision cache decides when to ask again.

use crate::error::AuthzError;
use crate::requirement::{Permission, Requirement, Verdict};
use crate::token::{OAuthErrorBody, TokenAcquirer};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use log::{debug, error, warn};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const UMA_TICKET_GRANT: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// Asks the authorization server for a verdict on one requirement.
#[async_trait]
pub trait PermissionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        principal_token: &str,
        requirement: &Requirement,
    ) -> Result<Verdict, AuthzError>;
}

/// Builds the HTTP client used for authorization server calls.
pub fn build_http_client(timeout: Duration) -> Result<Client, AuthzError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(2)))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .build()
        .map_err(|e| {
            AuthzError::AuthServerUnreachable(format!("failed to build HTTP client: {e}"))
        })
}

/// Endpoints of a Keycloak realm derived from its authority URL
/// (`https://host/realms/<realm>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeycloakRealm {
    authority: Url,
}

impl KeycloakRealm {
    pub fn new(authority: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            authority: Url::parse(authority.trim_end_matches('/'))?,
        })
    }

    /// Issuer expected in tokens of this realm
    pub fn issuer(&self) -> &str {
        self.authority.as_str().trim_end_matches('/')
    }

    pub fn token_endpoint(&self) -> Result<Url, url::ParseError> {
        self.endpoint("protocol/openid-connect/token")
    }

    pub fn jwks_uri(&self) -> Result<Url, url::ParseError> {
        self.endpoint("protocol/openid-connect/certs")
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}/{}", self.issuer(), path))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DecisionBody {
    Structured { result: bool },
    Bare(bool),
}

#[derive(Debug, Deserialize)]
struct RptResponse {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct RptClaims {
    #[serde(default)]
    authorization: Option<RptAuthorization>,
}

#[derive(Debug, Default, Deserialize)]
struct RptAuthorization {
    #[serde(default)]
    permissions: Vec<RptPermission>,
}

#[derive(Debug, Deserialize)]
struct RptPermission {
    #[serde(default)]
    rsid: Option<String>,
    #[serde(default)]
    rsname: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
}

impl RptPermission {
    fn grants(&self, permission: &Permission) -> bool {
        let resource_matches = self.rsname.as_deref() == Some(permission.resource.as_str())
            || self.rsid.as_deref() == Some(permission.resource.as_str());
        resource_matches && self.scopes.iter().any(|s| *s == permission.scope)
    }
}

/// Permission decision client backed by a Keycloak realm.
pub struct KeycloakEvaluator {
    http: Client,
    token_endpoint: Url,
    audience: String,
    tokens: Arc<TokenAcquirer>,
}

impl KeycloakEvaluator {
    pub fn new(
        http: Client,
        token_endpoint: Url,
        audience: impl Into<String>,
        tokens: Arc<TokenAcquirer>,
    ) -> Self {
        Self {
            http,
            token_endpoint,
            audience: audience.into(),
            tokens,
        }
    }

    /// Decision mode: the resource server asks on behalf of the principal.
    pub async fn decide(
        &self,
        principal_token: &str,
        permission: &Permission,
    ) -> Result<Verdict, AuthzError> {
        let service_token = self.tokens.acquire().await?;
        let permission_param = permission.to_string();

        let response = self
            .http
            .post(self.token_endpoint.clone())
            .bearer_auth(&service_token.value)
            .form(&[
                ("grant_type", UMA_TICKET_GRANT),
                ("audience", self.audience.as_str()),
                ("permission", permission_param.as_str()),
                ("response_mode", "decision"),
                ("subject_token", principal_token),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body = response.bytes().await?;
            return match serde_json::from_slice::<DecisionBody>(&body) {
                Ok(DecisionBody::Structured { result }) | Ok(DecisionBody::Bare(result)) => {
                    debug!("Decision for {}: {}", permission, result);
                    Ok(Verdict::from(result))
                }
                Err(e) => Err(AuthzError::MalformedResponse(format!(
                    "unexpected decision body: {e}"
                ))),
            };
        }

        if status == StatusCode::UNAUTHORIZED {
            // The authorization server no longer accepts our service token
            self.tokens.invalidate();
            let body = response.text().await.unwrap_or_default();
            let reason = OAuthErrorBody::parse(&body)
                .map(|e| e.describe())
                .unwrap_or_else(|| "service token rejected".to_string());
            error!("Decision request rejected the service token: {}", reason);
            return Err(AuthzError::InvalidCredentials(reason));
        }

        self.denial_or_error(response, &["access_denied"]).await
    }

    /// RPT mode: the principal asks for a token that embeds the permission.
    pub async fn request_rpt(
        &self,
        principal_token: &str,
        permission: &Permission,
    ) -> Result<Verdict, AuthzError> {
        let permission_param = permission.to_string();

        let response = self
            .http
            .post(self.token_endpoint.clone())
            .bearer_auth(principal_token)
            .form(&[
                ("grant_type", UMA_TICKET_GRANT),
                ("audience", self.audience.as_str()),
                ("permission", permission_param.as_str()),
            ])
            .send()
            .await?;

        if response.status().is_success() {
            let body = response.bytes().await?;
            let rpt: RptResponse = serde_json::from_slice(&body)?;
            let claims = decode_rpt_claims(&rpt.access_token)?;
            let granted = claims
                .authorization
                .unwrap_or_default()
                .permissions
                .iter()
                .any(|p| p.grants(permission));
            if !granted {
                warn!("RPT issued without permission {}", permission);
            }
            return Ok(Verdict::from(granted));
        }

        self.denial_or_error(response, &["access_denied", "request_submitted"])
            .await
    }

    /// Maps a non-2xx answer to a DENY when it is a policy decision,
    /// otherwise to an error.
    async fn denial_or_error(
        &self,
        response: Response,
        denial_codes: &[&str],
    ) -> Result<Verdict, AuthzError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let oauth_error = OAuthErrorBody::parse(&body);

        match oauth_error {
            Some(err) if denial_codes.contains(&err.error.as_str()) => {
                debug!("Authorization server denied: {}", err.describe());
                Ok(Verdict::Deny)
            }
            other => Err(AuthzError::AuthServerError {
                status: Some(status.as_u16()),
                message: other
                    .map(|e| e.describe())
                    .unwrap_or_else(|| format!("unexpected status {status}")),
            }),
        }
    }
}

#[async_trait]
impl PermissionEvaluator for KeycloakEvaluator {
    async fn evaluate(
        &self,
        principal_token: &str,
        requirement: &Requirement,
    ) -> Result<Verdict, AuthzError> {
        match requirement {
            Requirement::Decision(permission) => self.decide(principal_token, permission).await,
            Requirement::Rpt(permission) => self.request_rpt(principal_token, permission).await,
        }
    }
}

/// Reads the payload of an RPT issued to us over the token endpoint.
///
/// The token comes straight from the authorization server in response to our
/// own request, so only its payload is decoded here.
fn decode_rpt_claims(token: &str) -> Result<RptClaims, AuthzError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthzError::MalformedResponse("RPT is not a JWT".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthzError::MalformedResponse(format!("RPT payload is not base64url: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}
