//! # marketplace-realtime
//!
//! Real-time event delivery layer for a craft marketplace.
//!
//! Clients hold an authenticated WebSocket, send role-gated domain events
//! that are validated before any handler runs, and receive notifications
//! pushed by domain code. High-frequency broadcast types are throttled and
//! coalesced. Clients that lose the socket fall back to polling a
//! reconciliation endpoint that never misses what the live channel
//! delivered inside its lookback window. Security-relevant actions are
//! forwarded to an audit sink without blocking delivery.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket /ws, HTTP /api/v1)
//!     │
//!     ├── WS session (ws/)          ├── REST handlers (api/)
//!     │
//!     ├── ConnectionGate · EventBus · AdminService (service/)
//!     ├── NotificationPublisher · ReconciliationService (service/)
//!     ├── AuditForwarder (service/)
//!     │
//!     ├── ConnectionRegistry · RuleTable · Throttler (domain/)
//!     ├── NotificationJournal (domain/)
//!     │
//!     └── PostgreSQL update sources and audit sink (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod ws;

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Builds the full application router.
///
/// `request_timeout` bounds the HTTP routes only; live sockets are
/// governed by the session's liveness pings.
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    let http = api::build_router().layer(TimeoutLayer::new(request_timeout));

    #[cfg(feature = "swagger-ui")]
    let http = {
        use utoipa::OpenApi;
        http.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::openapi::ApiDoc::openapi()),
        )
    };

    Router::new()
        .merge(http)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
