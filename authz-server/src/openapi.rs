use crate::state::AppState;
use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const CUSTOMERS_TAG: &str = "Customers API";

#[derive(OpenApi)]
#[openapi(
    modifiers(&BearerAuth),
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = CUSTOMERS_TAG, description = "Customer endpoints guarded by Keycloak policies"),
    ),
    info(
        title = "Authz Resource Server API",
        description = "Customer API protected by Keycloak authorization decisions",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;

/// Registers the `bearer` scheme referenced by protected routes
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Serves the generated document at `/openapi.json`
pub(crate) fn router(api_doc: utoipa::openapi::OpenApi) -> Router<AppState> {
    Router::new().route(
        "/openapi.json",
        get(move || {
            let api_doc = api_doc.clone();
            async move { Json(api_doc) }
        }),
    )
}
