use crate::authn::AuthnError;
use crate::errors::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::HeaderMap;
use log::{debug, warn};

/// Verifies the bearer JWT and stores the resulting `Principal` in the
/// request extensions for the policy middleware and handlers.
pub(super) async fn authentication_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = match bearer_token(request.headers()) {
        Ok(token) => token.to_string(),
        Err(err) => {
            debug!("Rejecting request to {}: {}", request.uri().path(), err);
            return ApiError::from(err).into_response();
        }
    };

    match state.authenticator.authenticate(&token).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => {
            warn!("Authentication failed: {}", err);
            ApiError::from(err).into_response()
        }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header
fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthnError> {
    let header = headers
        .get(http::header::AUTHORIZATION)
        .ok_or(AuthnError::MissingToken)?
        .to_str()
        .map_err(|_| AuthnError::InvalidToken("non-ASCII authorization header".to_string()))?;

    match header.split_once(' ') {
        Some((scheme, token))
            if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() =>
        {
            Ok(token.trim())
        }
        _ => Err(AuthnError::InvalidToken(
            "authorization header is not a bearer token".to_string(),
        )),
    }
}
