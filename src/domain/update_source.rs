//! Collaborators the reconciliation endpoint queries for missed changes.
//!
//! Every source orders its entries by the same key: the millisecond at
//! which the entry became visible, then the notification id. Sources apply
//! the page window themselves, so a source with more entries than one page
//! never loses the tail.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;

use super::{Identity, Notification};
use crate::error::RealtimeError;

/// A notification together with the instant it became visible to the user.
///
/// For table-backed sources that is the decision time. For the live
/// journal it is the publish time, which can be later than
/// [`Notification::timestamp`] when a change is announced after the fact.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedUpdate {
    /// Visibility instant; the ordering key.
    pub at: DateTime<Utc>,
    /// The notification itself.
    pub notification: Notification,
}

impl SourcedUpdate {
    /// Millisecond part of the ordering key.
    #[must_use]
    pub fn millis(&self) -> i64 {
        self.at.timestamp_millis()
    }
}

/// Position in the `(millis, id)` order, newest first. Entries strictly
/// after the cursor come next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    millis: i64,
    id: String,
}

impl Cursor {
    /// Cursor positioned at `update`.
    #[must_use]
    pub fn of(update: &SourcedUpdate) -> Self {
        Self {
            millis: update.millis(),
            id: update.notification.id.clone(),
        }
    }

    /// Milliseconds since the epoch.
    #[must_use]
    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Notification id tie-breaker.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `true` if `update` sorts strictly after this cursor.
    #[must_use]
    pub fn precedes(&self, update: &SourcedUpdate) -> bool {
        let millis = update.millis();
        millis < self.millis || (millis == self.millis && update.notification.id < self.id)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.millis, self.id)
    }
}

impl FromStr for Cursor {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RealtimeError::InvalidRequest(format!("invalid cursor: {s}"));
        let (millis, id) = s.split_once(':').ok_or_else(invalid)?;
        if id.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            id: id.to_string(),
        })
    }
}

/// Window a source is asked for.
#[derive(Debug, Clone)]
pub struct SourceQuery {
    /// Only entries visible strictly after this instant.
    pub since: DateTime<Utc>,
    /// Only entries strictly after this position.
    pub after: Option<Cursor>,
    /// Most entries to return.
    pub limit: usize,
}

impl SourceQuery {
    /// `true` if `update` falls inside the window, ignoring `limit`.
    #[must_use]
    pub fn admits(&self, update: &SourcedUpdate) -> bool {
        update.at > self.since && self.after.as_ref().is_none_or(|c| c.precedes(update))
    }
}

/// Sorts newest first by `(millis, id)` and keeps the first entry per
/// notification id.
pub fn order_newest_first(updates: &mut Vec<SourcedUpdate>) {
    updates.sort_by(|a, b| {
        b.millis()
            .cmp(&a.millis())
            .then_with(|| b.notification.id.cmp(&a.notification.id))
    });
    let mut seen = std::collections::HashSet::new();
    updates.retain(|u| seen.insert(u.notification.id.clone()));
}

/// A domain collaborator that can list recent mutations visible to an
/// identity, already translated into [`Notification`]s.
pub trait UpdateSource: Send + Sync + std::fmt::Debug {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Entries `identity` may see that `query` admits: newest first, unique
    /// by notification id, at most `query.limit` of them.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::SourceUnavailable`] when the collaborator
    /// cannot be queried.
    fn updates<'a>(
        &'a self,
        identity: &'a Identity,
        query: &'a SourceQuery,
    ) -> BoxFuture<'a, Result<Vec<SourcedUpdate>, RealtimeError>>;
}
