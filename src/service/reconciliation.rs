//! Polling fallback: everything an identity may have missed since a point
//! in time.
//!
//! Each [`UpdateSource`] is queried concurrently for one page past the
//! cursor. Results are merged, de-duplicated by notification id and ordered
//! newest first by `(visibility millis, id)`. That same key forms the page
//! cursor, so a client walking pages never skips or repeats an entry. Any
//! failing source fails the whole request; a partial answer would look
//! complete to the client and silently lose notifications.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::try_join_all;
use serde::Serialize;
use utoipa::ToSchema;

pub use crate::domain::Cursor;
use crate::domain::{Identity, Notification, SourceQuery, UpdateSource, order_newest_first};
use crate::error::RealtimeError;

/// Parameters of one reconciliation request.
#[derive(Debug, Clone, Default)]
pub struct UpdatesQuery {
    /// Last processed timestamp; `None` means the whole window.
    pub since: Option<DateTime<Utc>>,
    /// Continue after this position.
    pub cursor: Option<Cursor>,
    /// Page size.
    pub limit: Option<usize>,
}

/// One page of missed notifications.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatesPage {
    /// Number of notifications in this page.
    pub count: usize,
    /// Notifications, newest first.
    pub updates: Vec<Notification>,
    /// Cursor for the next page, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Oldest timestamp this request could return.
    pub window_start: DateTime<Utc>,
}

/// Page size bounds.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    /// Used when the request names none.
    pub default: usize,
    /// Upper bound on any request.
    pub max: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default: 50,
            max: 200,
        }
    }
}

/// Merges [`UpdateSource`] results into pages.
#[derive(Debug, Clone)]
pub struct ReconciliationService {
    sources: Vec<Arc<dyn UpdateSource>>,
    max_lookback: Duration,
    limits: PageLimits,
}

impl ReconciliationService {
    /// Creates a service over `sources`.
    #[must_use]
    pub fn new(
        sources: Vec<Arc<dyn UpdateSource>>,
        max_lookback: Duration,
        limits: PageLimits,
    ) -> Self {
        Self {
            sources,
            max_lookback,
            limits,
        }
    }

    /// Names of the configured sources.
    #[must_use]
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Notifications visible to `identity` newer than `query.since`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::SourceUnavailable`] if any source fails and
    /// [`RealtimeError::InvalidRequest`] for a zero limit.
    pub async fn updates(
        &self,
        identity: &Identity,
        query: UpdatesQuery,
    ) -> Result<UpdatesPage, RealtimeError> {
        let now = Utc::now();
        let window_start = now - self.max_lookback;
        let limit = match query.limit {
            Some(0) => {
                return Err(RealtimeError::InvalidRequest(
                    "limit must be positive".to_string(),
                ));
            }
            Some(limit) => limit.min(self.limits.max),
            None => self.limits.default,
        };
        let since = query.since.map_or(window_start, |s| s.max(window_start));
        if since >= now {
            return Ok(UpdatesPage {
                count: 0,
                updates: Vec::new(),
                next_cursor: None,
                window_start,
            });
        }

        // One extra entry per source tells whether another page exists.
        let window = SourceQuery {
            since,
            after: query.cursor,
            limit: limit.saturating_add(1),
        };
        let window = &window;
        let batches = try_join_all(self.sources.iter().map(|source| async move {
            source
                .updates(identity, window)
                .await
                .map_err(|err| match err {
                    unavailable @ RealtimeError::SourceUnavailable { .. } => unavailable,
                    other => RealtimeError::SourceUnavailable {
                        source_name: source.name(),
                        detail: other.to_string(),
                    },
                })
        }))
        .await
        .inspect_err(|err| {
            tracing::warn!(user_id = %identity.user_id, error = %err, "reconciliation failed");
        })?;

        let mut merged: Vec<_> = batches
            .into_iter()
            .flatten()
            .filter(|u| window.admits(u))
            .collect();
        order_newest_first(&mut merged);

        let more = merged.len() > limit;
        merged.truncate(limit);
        let next_cursor = match merged.last() {
            Some(last) if more => Some(Cursor::of(last).to_string()),
            _ => None,
        };
        let updates: Vec<Notification> = merged.into_iter().map(|u| u.notification).collect();

        tracing::debug!(
            user_id = %identity.user_id,
            count = updates.len(),
            more = next_cursor.is_some(),
            "reconciliation served"
        );
        Ok(UpdatesPage {
            count: updates.len(),
            updates,
            next_cursor,
            window_start,
        })
    }
}
