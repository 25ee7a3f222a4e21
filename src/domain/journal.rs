//! Bounded record of notifications pushed over the live channel.
//!
//! Every user- or role-targeted notification is appended here before it is
//! pushed, so reconciliation can always return what the live channel
//! delivered inside the lookback window, even when no domain table records
//! the change. Entries are keyed by the moment they were recorded, not by
//! the mutation time the notification carries. Entries older than the
//! retention window, or beyond the per-room capacity, are discarded.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use super::{
    Identity, Notification, RoomId, SourceQuery, SourcedUpdate, UpdateSource, order_newest_first,
};
use crate::error::RealtimeError;

/// In-memory notification journal keyed by room.
#[derive(Debug)]
pub struct NotificationJournal {
    entries: RwLock<HashMap<RoomId, VecDeque<SourcedUpdate>>>,
    capacity_per_room: usize,
    retention: Duration,
}

impl NotificationJournal {
    /// Creates a journal keeping at most `capacity_per_room` entries per room,
    /// none older than `retention`.
    #[must_use]
    pub fn new(capacity_per_room: usize, retention: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity_per_room: capacity_per_room.max(1),
            retention,
        }
    }

    /// Appends `notification` under `room`, stamped with the current time.
    ///
    /// A room at capacity loses its oldest entry. That entry is still inside
    /// the retention window, so polling clients can no longer recover it;
    /// each such eviction is logged. Returns the number of entries evicted.
    pub async fn record(&self, room: &RoomId, notification: Notification) -> usize {
        self.record_at(room, notification, Utc::now()).await
    }

    async fn record_at(
        &self,
        room: &RoomId,
        notification: Notification,
        now: DateTime<Utc>,
    ) -> usize {
        let cutoff = now - self.retention;
        let mut entries = self.entries.write().await;
        let queue = entries.entry(room.clone()).or_default();
        queue.retain(|u| u.at > cutoff);
        queue.push_back(SourcedUpdate {
            at: now,
            notification,
        });
        let mut evicted_count = 0;
        while queue.len() > self.capacity_per_room {
            if let Some(evicted) = queue.pop_front() {
                evicted_count += 1;
                tracing::warn!(
                    %room,
                    notification_id = %evicted.notification.id,
                    recorded_at = %evicted.at,
                    capacity = self.capacity_per_room,
                    "journal full, evicting entry inside the lookback window"
                );
            }
        }
        evicted_count
    }

    /// Entries for the identity's user and role rooms that `query` admits,
    /// newest first.
    pub async fn window(&self, identity: &Identity, query: &SourceQuery) -> Vec<SourcedUpdate> {
        let mut admitted: Vec<SourcedUpdate> = {
            let entries = self.entries.read().await;
            RoomId::for_identity(&identity.user_id, identity.role)
                .iter()
                .filter_map(|room| entries.get(room))
                .flatten()
                .filter(|u| query.admits(u))
                .cloned()
                .collect()
        };
        order_newest_first(&mut admitted);
        admitted.truncate(query.limit);
        admitted
    }

    /// Drops expired entries and empty rooms.
    pub async fn prune(&self) {
        let cutoff = Utc::now() - self.retention;
        let mut entries = self.entries.write().await;
        entries.retain(|_, queue| {
            queue.retain(|u| u.at > cutoff);
            !queue.is_empty()
        });
    }

    /// Total number of retained entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(VecDeque::len).sum()
    }

    /// Returns `true` when nothing is retained.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl UpdateSource for NotificationJournal {
    fn name(&self) -> &'static str {
        "live_journal"
    }

    fn updates<'a>(
        &'a self,
        identity: &'a Identity,
        query: &'a SourceQuery,
    ) -> BoxFuture<'a, Result<Vec<SourcedUpdate>, RealtimeError>> {
        Box::pin(async move { Ok(self.window(identity, query).await) })
    }
}
