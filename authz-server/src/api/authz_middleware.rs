use crate::errors::ApiError;
use crate::state::AppState;
use authz_core::Principal;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use log::{debug, error, info};

/// State for [`policy_middleware`]: the application plus the policy to enforce
#[derive(Clone)]
pub(crate) struct RequirePolicy {
    pub(crate) state: AppState,
    pub(crate) policy: &'static str,
}

impl RequirePolicy {
    pub(crate) fn new(state: &AppState, policy: &'static str) -> Self {
        Self {
            state: state.clone(),
            policy,
        }
    }
}

/// Runs every requirement of the policy through the gate. Must be layered
/// inside the authentication middleware.
pub(crate) async fn policy_middleware(
    State(guard): State<RequirePolicy>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(principal) = request.extensions().get::<Principal>().cloned() else {
        return ApiError::unauthorized().into_response();
    };

    let requirements = match guard.state.policies.get(guard.policy) {
        Ok(requirements) => requirements,
        Err(err) => {
            error!("Route protected by unusable policy: {}", err);
            return ApiError::internal("Internal server error").into_response();
        }
    };

    let authorization = guard.state.gate.authorize(&principal, requirements).await;
    if let Some(err) = authorization.fatal_error() {
        error!(
            "Authorization of {} for policy '{}' failed: {}",
            principal.subject(),
            guard.policy,
            err
        );
        return ApiError::from(err).into_response();
    }
    if !authorization.is_allowed() {
        info!(
            "Denied {} for policy '{}'",
            principal.subject(),
            guard.policy
        );
        return ApiError::forbidden().into_response();
    }

    debug!(
        "Allowed {} for policy '{}'",
        principal.subject(),
        guard.policy
    );
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestFixture;
    use axum::routing::get;
    use axum::Router;
    use http::StatusCode;
    use tower::ServiceExt;

    const TEST_ROUTE: &str = "/test";

    /// Mock app guarded by a policy, without authentication in front
    fn setup_policy_mock_app(fixture: &TestFixture, policy: &'static str) -> Router {
        Router::new()
            .route(TEST_ROUTE, get(async || (StatusCode::OK, "Authorized")))
            .route_layer(axum::middleware::from_fn_with_state(
                RequirePolicy::new(&fixture.state, policy),
                policy_middleware,
            ))
    }

    async fn send_as(app: &Router, principal: Option<Principal>) -> StatusCode {
        let mut request = Request::builder()
            .uri(TEST_ROUTE)
            .body(Body::empty())
            .expect("Failed to build request");
        if let Some(principal) = principal {
            request.extensions_mut().insert(principal);
        }
        app.clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
            .status()
    }

    #[tokio::test]
    async fn test_missing_principal_is_unauthorized() {
        let fixture = TestFixture::new().await;
        let app = setup_policy_mock_app(&fixture, "customers#read");
        assert_eq!(send_as(&app, None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_policy_is_internal_error() {
        let fixture = TestFixture::new().await;
        let app = setup_policy_mock_app(&fixture, "orders#write");
        let principal = fixture.principal_for("user-1", &[]);
        assert_eq!(
            send_as(&app, Some(principal)).await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_allowed_principal_reaches_handler() {
        let fixture = TestFixture::new().await;
        fixture.mount_service_token(1).await;
        fixture.mount_decision(true, 1).await;

        let app = setup_policy_mock_app(&fixture, "customers#read");
        let principal = fixture.principal_for("user-1", &["customer-reader"]);
        assert_eq!(send_as(&app, Some(principal)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_denied_principal_is_forbidden() {
        let fixture = TestFixture::new().await;
        fixture.mount_service_token(1).await;
        fixture.mount_decision(false, 1).await;

        let app = setup_policy_mock_app(&fixture, "customers#read");
        let principal = fixture.principal_for("user-1", &[]);
        assert_eq!(send_as(&app, Some(principal)).await, StatusCode::FORBIDDEN);
    }
}
