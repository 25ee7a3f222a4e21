//! Authenticated identity and the live connection record.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use super::{ConnectionId, Role, RoomId, UserId};

/// Identity extracted from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Marketplace user identifier.
    pub user_id: UserId,
    /// The single role granted by the token.
    pub role: Role,
    /// Account email, informational only.
    pub email: String,
}

/// A live, admitted connection.
///
/// Created by the [`super::ConnectionRegistry`] on successful admission and
/// dropped on eviction. Identity and rooms are fixed for the lifetime of
/// the record; only liveness bookkeeping mutates.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    connected_at: DateTime<Utc>,
    rooms: [RoomId; 2],
    last_seen_ms: AtomicI64,
    validation_failures: AtomicU32,
}

impl Connection {
    /// Creates a connection record for an admitted identity.
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        let now = Utc::now();
        let rooms = RoomId::for_identity(&identity.user_id, identity.role);
        Self {
            id: ConnectionId::new(),
            identity,
            connected_at: now,
            rooms,
            last_seen_ms: AtomicI64::new(now.timestamp_millis()),
            validation_failures: AtomicU32::new(0),
        }
    }

    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Identity bound at admission.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Shortcut for `identity().user_id`.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    /// Shortcut for `identity().role`.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.identity.role
    }

    /// Admission timestamp.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Rooms joined at admission: the user room and the role room.
    #[must_use]
    pub fn rooms(&self) -> &[RoomId] {
        &self.rooms
    }

    /// Timestamp of the last inbound frame.
    #[must_use]
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_seen_ms.load(Ordering::Relaxed))
            .single()
            .unwrap_or(self.connected_at)
    }

    /// Records inbound activity.
    pub fn touch(&self) {
        self.last_seen_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Increments the validation failure counter, returning the new count.
    pub fn record_validation_failure(&self) -> u32 {
        self.validation_failures
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    /// Serializable view for administrative listings.
    #[must_use]
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            connection_id: self.id,
            user_id: self.identity.user_id.clone(),
            role: self.identity.role,
            email: self.identity.email.clone(),
            connected_at: self.connected_at,
            last_seen_at: self.last_seen_at(),
            rooms: self.rooms.to_vec(),
        }
    }
}

/// Read-only connection view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    /// Connection identifier.
    pub connection_id: ConnectionId,
    /// Owning user.
    pub user_id: UserId,
    /// Connection role.
    pub role: Role,
    /// Account email.
    pub email: String,
    /// Admission timestamp.
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity.
    pub last_seen_at: DateTime<Utc>,
    /// Room memberships.
    pub rooms: Vec<RoomId>,
}
