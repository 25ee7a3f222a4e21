//! Administrative endpoints: rule table, live connections, broadcast.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::api::dto::{BroadcastRequest, ConnectionDto, DeliveryDto, RuleDto, RuleInstalledResponse};
use crate::api::extractors::AdminUser;
use crate::app_state::AppState;
use crate::domain::{ConnectionId, RoomId, RuleSpec};
use crate::error::{ErrorResponse, RealtimeError};

/// `GET /admin/rules`: Installed event rules.
#[utoipa::path(
    get,
    path = "/api/v1/admin/rules",
    tag = "Admin",
    summary = "List event rules",
    responses(
        (status = 200, description = "Rules sorted by event name", body = Vec<RuleDto>),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn list_rules(State(state): State<AppState>, _admin: AdminUser) -> Json<Vec<RuleDto>> {
    let rules = state.admin.list_rules().await;
    Json(rules.iter().map(|rule| RuleDto::from(rule.as_ref())).collect())
}

/// `POST /admin/rules`: Install or replace a rule.
///
/// # Errors
///
/// Returns [`RealtimeError::Rule`] for malformed rules or unknown roles.
#[utoipa::path(
    post,
    path = "/api/v1/admin/rules",
    tag = "Admin",
    summary = "Install an event rule",
    description = "Installs a rule, replacing any rule for the same event. Takes effect for the next inbound event; in-flight authorizations finish against the rule they started with.",
    request_body = RuleSpec,
    responses(
        (status = 200, description = "Rule replaced", body = RuleInstalledResponse),
        (status = 201, description = "Rule added", body = RuleInstalledResponse),
        (status = 400, description = "Malformed rule or unknown role", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn upsert_rule(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(spec): Json<RuleSpec>,
) -> Result<impl IntoResponse, RealtimeError> {
    let event_name = spec.event_name.clone();
    let replaced = state.admin.upsert_rule(&actor, spec).await?;
    let status = if replaced {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(RuleInstalledResponse {
            event_name,
            replaced,
        }),
    ))
}

/// `DELETE /admin/rules/{event}`: Remove a rule; the event is denied
/// afterward.
///
/// # Errors
///
/// Returns [`RealtimeError::Rule`] with 404 when no such rule exists.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/rules/{event}",
    tag = "Admin",
    summary = "Remove an event rule",
    params(("event" = String, Path, description = "Inbound event name")),
    responses(
        (status = 204, description = "Rule removed"),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 404, description = "No such rule", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn remove_rule(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(event): Path<String>,
) -> Result<StatusCode, RealtimeError> {
    state.admin.remove_rule(&actor, &event).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /admin/connections`: Live connections, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/admin/connections",
    tag = "Admin",
    summary = "List live connections",
    responses(
        (status = 200, description = "Live connections", body = Vec<ConnectionDto>),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn list_connections(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Json<Vec<ConnectionDto>> {
    let connections = state.admin.list_connections().await;
    Json(connections.into_iter().map(ConnectionDto::from).collect())
}

/// `DELETE /admin/connections/{id}`: Force-evict a connection.
///
/// # Errors
///
/// Returns [`RealtimeError::InvalidRequest`] for a malformed id and
/// [`RealtimeError::ConnectionNotFound`] for an unknown one.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/connections/{id}",
    tag = "Admin",
    summary = "Evict a connection",
    params(("id" = String, Path, description = "Connection UUID")),
    responses(
        (status = 200, description = "Connection evicted", body = ConnectionDto),
        (status = 400, description = "Malformed connection id", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 404, description = "No such connection", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn evict_connection(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<ConnectionDto>, RealtimeError> {
    let id: ConnectionId = id
        .parse()
        .map_err(|_| RealtimeError::InvalidRequest(format!("invalid connection id: {id}")))?;
    let evicted = state.admin.evict_connection(&actor, None, id).await?;
    Ok(Json(ConnectionDto::from(evicted)))
}

/// `POST /admin/broadcast`: Push an event to a room or to everyone.
///
/// # Errors
///
/// Returns [`RealtimeError::InvalidRequest`] for an unknown room or an
/// empty event name.
#[utoipa::path(
    post,
    path = "/api/v1/admin/broadcast",
    tag = "Admin",
    summary = "Broadcast an event",
    request_body = BroadcastRequest,
    responses(
        (status = 200, description = "Fan-out result", body = DeliveryDto),
        (status = 400, description = "Unknown room or empty event", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn broadcast(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<DeliveryDto>, RealtimeError> {
    let room = req
        .room
        .as_deref()
        .map(str::parse::<RoomId>)
        .transpose()
        .map_err(|err| RealtimeError::InvalidRequest(err.to_string()))?;
    let report = state
        .admin
        .broadcast(&actor, room, &req.event, req.payload)
        .await?;
    Ok(Json(DeliveryDto::from(report)))
}

/// Administrative routes, nested under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/rules", get(list_rules).post(upsert_rule))
        .route("/admin/rules/{event}", delete(remove_rule))
        .route("/admin/connections", get(list_connections))
        .route("/admin/connections/{id}", delete(evict_connection))
        .route("/admin/broadcast", post(broadcast))
}
