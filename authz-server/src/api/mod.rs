mod authn_middleware;
mod authz_middleware;
pub(crate) mod customers;
pub(crate) mod health;

use crate::api::authn_middleware::authentication_middleware;
use crate::api::authz_middleware::{policy_middleware, RequirePolicy};
use crate::config::CUSTOMERS_READ_POLICY;
use crate::state::AppState;
use axum::middleware;
use utoipa_axum::router::OpenApiRouter;

/// Combines all API routes into a single router
pub(super) fn router(state: &AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .merge(health::router())
        .merge(protected_routes(state))
}

/// Routes that require a bearer token and the `customers#read` policy
fn protected_routes(state: &AppState) -> OpenApiRouter<AppState> {
    // The last layer added runs first: authenticate, then authorize.
    // route_layer keeps unmatched paths answering 404 instead of 401.
    customers::router()
        .route_layer(middleware::from_fn_with_state(
            RequirePolicy::new(state, CUSTOMERS_READ_POLICY),
            policy_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authentication_middleware,
        ))
}
