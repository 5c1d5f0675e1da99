use crate::authn::AuthnError;
use authz_core::AuthzError;
use axum::response::IntoResponse;
use axum::Json;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, StatusCode};
use serde_json::json;

/// Error answered to API clients as `{"detail": "..."}`.
///
/// Details stay generic: upstream messages and policy names are logged, never
/// returned.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub detail: String,
    pub status_code: StatusCode,
}

impl ApiError {
    /// Create a new ApiError with a detail message and status code
    pub fn new<S: ToString>(detail: S, status_code: StatusCode) -> Self {
        Self {
            detail: detail.to_string(),
            status_code,
        }
    }

    /// Create new Internal Server Error (500) with a detail message
    pub fn internal<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn unauthorized() -> Self {
        Self::new("Not authenticated", StatusCode::UNAUTHORIZED)
    }

    pub fn forbidden() -> Self {
        Self::new("Forbidden", StatusCode::FORBIDDEN)
    }

    pub fn not_found<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::NOT_FOUND)
    }

    /// Create new Bad Gateway (502) with a detail message
    pub fn bad_gateway<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::BAD_GATEWAY)
    }

    pub fn service_unavailable<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::SERVICE_UNAVAILABLE)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code;
        let body = json!({
            "detail": self.detail,
        });
        let mut response = (status_code, Json(body)).into_response();
        if status_code == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<&AuthzError> for ApiError {
    fn from(err: &AuthzError) -> Self {
        match err {
            // Deny by default when the answer did not arrive in time
            AuthzError::Timeout => ApiError::forbidden(),
            AuthzError::AuthServerUnreachable(_) => {
                ApiError::service_unavailable("Authorization server unavailable")
            }
            AuthzError::InvalidCredentials(_)
            | AuthzError::MalformedResponse(_)
            | AuthzError::AuthServerError { .. }
            | AuthzError::EvaluationAborted => {
                ApiError::bad_gateway("Authorization server error")
            }
        }
    }
}

impl From<AuthnError> for ApiError {
    fn from(err: AuthnError) -> Self {
        match err {
            AuthnError::KeysUnavailable(_) => {
                ApiError::service_unavailable("Identity provider unavailable")
            }
            AuthnError::MissingToken | AuthnError::InvalidToken(_) | AuthnError::UnknownKey(_) => {
                ApiError::unauthorized()
            }
        }
    }
}
