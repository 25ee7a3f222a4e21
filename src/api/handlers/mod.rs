//! REST endpoint handlers organized by resource.

pub mod admin;
pub mod system;
pub mod updates;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().merge(updates::routes()).merge(admin::routes())
}
