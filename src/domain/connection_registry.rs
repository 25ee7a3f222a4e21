//! Live connection index with room membership.
//!
//! [`ConnectionRegistry`] owns every admitted [`Connection`] together with
//! the sending half of its outbound queue. All three indices (by id, by
//! user, by room) live behind a single [`tokio::sync::RwLock`], so an
//! admission or eviction updates them atomically with respect to every
//! other admission, eviction and fan-out.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc};

use super::{Connection, ConnectionId, ConnectionSummary, Identity, OutboundEvent, RoomId, TargetSelector, UserId};

/// Why a connection left the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EvictionReason {
    /// The client closed the socket.
    ClientDisconnect,
    /// Liveness pings went unanswered.
    Timeout,
    /// An administrator forced the eviction.
    Administrative {
        /// The acting administrator.
        actor: UserId,
    },
    /// The server is shutting down.
    ServerShutdown,
}

impl EvictionReason {
    /// Short machine-readable label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClientDisconnect => "client_disconnect",
            Self::Timeout => "timeout",
            Self::Administrative { .. } => "administrative",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instruction consumed by a connection's transport task.
#[derive(Debug, Clone)]
pub enum ConnectionCommand {
    /// Write this event to the socket.
    Deliver(Arc<OutboundEvent>),
    /// Close the transport.
    Close(EvictionReason),
}

#[derive(Debug)]
struct Slot {
    connection: Arc<Connection>,
    sender: mpsc::Sender<ConnectionCommand>,
}

#[derive(Debug, Default)]
struct Index {
    connections: HashMap<ConnectionId, Slot>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl Index {
    fn members(&self, target: &TargetSelector) -> Vec<ConnectionId> {
        match target {
            TargetSelector::Room { room } => self
                .rooms
                .get(room)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            TargetSelector::Connections { ids } => ids
                .iter()
                .filter(|id| self.connections.contains_key(id))
                .copied()
                .collect(),
            TargetSelector::All => self.connections.keys().copied().collect(),
        }
    }
}

/// Result of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections whose queue accepted the event.
    pub delivered: usize,
    /// Connections skipped because their queue was full or closed.
    pub dropped: usize,
}

/// Central store of live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    index: RwLock<Index>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Creates an empty registry whose per-connection outbound queues hold
    /// at most `queue_capacity` commands.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Inserts a connection for an admitted identity and joins its rooms.
    ///
    /// Returns the record and the receiving half of its outbound queue.
    pub async fn register(
        &self,
        identity: Identity,
    ) -> (Arc<Connection>, mpsc::Receiver<ConnectionCommand>) {
        let connection = Arc::new(Connection::new(identity));
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let id = connection.id();

        let mut index = self.index.write().await;
        index
            .by_user
            .entry(connection.user_id().clone())
            .or_default()
            .insert(id);
        for room in connection.rooms() {
            index.rooms.entry(room.clone()).or_default().insert(id);
        }
        index.connections.insert(
            id,
            Slot {
                connection: Arc::clone(&connection),
                sender,
            },
        );
        drop(index);

        tracing::debug!(
            connection_id = %id,
            user_id = %connection.user_id(),
            role = %connection.role(),
            "connection registered"
        );
        (connection, receiver)
    }

    /// Removes a connection from every index.
    ///
    /// When `reason` is given, a [`ConnectionCommand::Close`] is queued
    /// before the sender is dropped; the transport task sees the channel
    /// close either way. Returns `None` if the id is unknown.
    pub async fn remove(
        &self,
        id: ConnectionId,
        reason: Option<EvictionReason>,
    ) -> Option<Arc<Connection>> {
        let mut index = self.index.write().await;
        let slot = index.connections.remove(&id)?;
        let user_id = slot.connection.user_id().clone();
        if let Some(ids) = index.by_user.get_mut(&user_id) {
            ids.remove(&id);
            if ids.is_empty() {
                index.by_user.remove(&user_id);
            }
        }
        for room in slot.connection.rooms() {
            if let Some(ids) = index.rooms.get_mut(room) {
                ids.remove(&id);
                if ids.is_empty() {
                    index.rooms.remove(room);
                }
            }
        }
        drop(index);

        if let Some(reason) = reason {
            let _ = slot.sender.try_send(ConnectionCommand::Close(reason));
        }
        Some(slot.connection)
    }

    /// Queues `event` for every connection matched by `target`.
    ///
    /// Never blocks on a slow consumer: a full queue drops the event for
    /// that connection only.
    pub async fn deliver(&self, target: &TargetSelector, event: OutboundEvent) -> DeliveryReport {
        let event = Arc::new(event);
        let index = self.index.read().await;
        let mut report = DeliveryReport::default();
        for id in index.members(target) {
            let Some(slot) = index.connections.get(&id) else {
                continue;
            };
            match slot
                .sender
                .try_send(ConnectionCommand::Deliver(Arc::clone(&event)))
            {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.dropped += 1;
                    tracing::warn!(
                        connection_id = %id,
                        event = %event.event_name,
                        full = matches!(err, mpsc::error::TrySendError::Full(_)),
                        "outbound event dropped"
                    );
                }
            }
        }
        report
    }

    /// Looks up a connection by id.
    pub async fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.index
            .read()
            .await
            .connections
            .get(&id)
            .map(|slot| Arc::clone(&slot.connection))
    }

    /// Connection ids currently owned by `user_id`.
    pub async fn connections_for_user(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.index
            .read()
            .await
            .by_user
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Connection ids currently in `room`.
    pub async fn room_members(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.index
            .read()
            .await
            .members(&TargetSelector::room(room.clone()))
    }

    /// Summaries of every live connection, oldest first.
    pub async fn list(&self) -> Vec<ConnectionSummary> {
        let index = self.index.read().await;
        let mut summaries: Vec<ConnectionSummary> = index
            .connections
            .values()
            .map(|slot| slot.connection.summary())
            .collect();
        summaries.sort_by_key(|s| s.connected_at);
        summaries
    }

    /// Ids of every live connection.
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.index.read().await.connections.keys().copied().collect()
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.index.read().await.connections.len()
    }

    /// Returns `true` if no connection is live.
    pub async fn is_empty(&self) -> bool {
        self.index.read().await.connections.is_empty()
    }
}
