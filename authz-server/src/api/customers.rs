use crate::errors::ApiError;
use crate::models::Customer;
use crate::openapi::CUSTOMERS_TAG;
use crate::state::AppState;
use axum::extract::{Json, Path, State};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

#[utoipa::path(
    get,
    path = "/customers",
    tag = CUSTOMERS_TAG,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "All customers", body = Vec<Customer>),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Policy denied the request"),
        (status = 502, description = "Authorization server error"),
        (status = 503, description = "Authorization server unavailable")
    )
)]
pub(super) async fn list_customers(State(state): State<AppState>) -> Json<Vec<Customer>> {
    Json(state.customers.list())
}

#[utoipa::path(
    get,
    path = "/customers/{id}",
    tag = CUSTOMERS_TAG,
    security(("bearer" = [])),
    params(
        ("id" = u32, Path, description = "Customer identifier"),
    ),
    responses(
        (status = 200, description = "The customer", body = Customer),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Policy denied the request"),
        (status = 404, description = "No customer with this id"),
        (status = 502, description = "Authorization server error"),
        (status = 503, description = "Authorization server unavailable")
    )
)]
pub(super) async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Customer>, ApiError> {
    state
        .customers
        .get(id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Customer not found"))
}

/// Customer routes; callers wrap them in authentication and policy layers
pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_customers))
        .routes(routes!(get_customer))
}
