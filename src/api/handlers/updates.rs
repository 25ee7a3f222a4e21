//! Reconciliation endpoint for clients whose live connection is down.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::UpdatesParams;
use crate::api::extractors::AuthenticatedUser;
use crate::app_state::AppState;
use crate::error::{ErrorResponse, RealtimeError};
use crate::service::{UpdatesPage, UpdatesQuery};

/// `GET /updates`: Notifications missed since a point in time.
///
/// # Errors
///
/// Returns [`RealtimeError`] for a missing token, a malformed cursor, or
/// an unavailable update source.
#[utoipa::path(
    get,
    path = "/api/v1/updates",
    tag = "Updates",
    summary = "Missed notifications",
    description = "Returns notifications visible to the caller that changed after `since`, newest first. Used while the live connection is down; duplicates of live pushes are expected and must be filtered by id.",
    params(UpdatesParams),
    responses(
        (status = 200, description = "One page of notifications", body = UpdatesPage),
        (status = 400, description = "Malformed cursor or limit", body = ErrorResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 503, description = "An update source is unavailable", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn list_updates(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(params): Query<UpdatesParams>,
) -> Result<Json<UpdatesPage>, RealtimeError> {
    let query = UpdatesQuery::try_from(params)?;
    let page = state.reconciliation.updates(&identity, query).await?;
    Ok(Json(page))
}

/// Update routes, nested under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/updates", get(list_updates))
}
