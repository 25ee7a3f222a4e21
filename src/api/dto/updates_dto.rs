//! Reconciliation query parameters.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::RealtimeError;
use crate::service::{Cursor, UpdatesQuery};

/// Query string of `GET /api/v1/updates`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UpdatesParams {
    /// Timestamp of the last processed notification (RFC 3339). Omit to
    /// fetch the whole lookback window.
    pub since: Option<DateTime<Utc>>,
    /// `nextCursor` from the previous page.
    pub cursor: Option<String>,
    /// Page size, capped by the server.
    pub limit: Option<usize>,
}

impl TryFrom<UpdatesParams> for UpdatesQuery {
    type Error = RealtimeError;

    fn try_from(params: UpdatesParams) -> Result<Self, Self::Error> {
        let cursor = params
            .cursor
            .filter(|c| !c.is_empty())
            .map(|c| c.parse::<Cursor>())
            .transpose()?;
        Ok(Self {
            since: params.since,
            cursor,
            limit: params.limit,
        })
    }
}
