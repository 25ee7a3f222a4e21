//! OpenAPI document for the HTTP surface.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::api::handlers::{admin, system, updates};

/// Generated OpenAPI description, served at `/api-docs/openapi.json`.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "marketplace-realtime",
        description = "Real-time event delivery for the craft marketplace. Live traffic runs over the `/ws` WebSocket; these routes cover the polling fallback and administration."
    ),
    paths(
        system::health_handler,
        updates::list_updates,
        admin::list_rules,
        admin::upsert_rule,
        admin::remove_rule,
        admin::list_connections,
        admin::evict_connection,
        admin::broadcast,
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "System", description = "Service health"),
        (name = "Updates", description = "Reconciliation for clients without a live connection"),
        (name = "Admin", description = "Rule table, live connections and broadcast; admin role only"),
    )
)]
pub struct ApiDoc;

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
