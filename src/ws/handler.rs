//! Axum WebSocket upgrade handler.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::connection::run_connection;
use crate::api::extractors::bearer_token;
use crate::app_state::AppState;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct UpgradeParams {
    /// Token for clients that cannot set headers on the upgrade.
    pub token: Option<String>,
}

/// `GET /ws`: Upgrade to a WebSocket session.
///
/// A token presented with the upgrade is verified first; an invalid one is
/// answered with `401` and no socket is opened. Without a token the socket
/// opens and the client must authenticate with its first frame.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<UpgradeParams>,
    headers: HeaderMap,
) -> Response {
    let token = bearer_token(&headers).or(params.token.filter(|t| !t.trim().is_empty()));
    let identity = match token {
        Some(token) => match state.gate.authenticate(&token).await {
            Ok(identity) => Some(identity),
            Err(err) => {
                tracing::info!(error = %err, "websocket upgrade rejected");
                return err.into_response();
            }
        },
        None => None,
    };
    ws.on_upgrade(move |socket| run_connection(socket, state, identity))
}
