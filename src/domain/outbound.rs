//! Server → client events and their delivery targets.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConnectionId, RoomId};

/// Event pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEvent {
    /// Event name, e.g. `moderation:decision`.
    pub event_name: String,
    /// Event-specific payload.
    pub payload: serde_json::Value,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
}

impl OutboundEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_name: event_name.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Where an outbound event is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetSelector {
    /// Every member of one room.
    Room {
        /// Target room.
        room: RoomId,
    },
    /// An explicit set of connections.
    Connections {
        /// Target connection ids.
        ids: Vec<ConnectionId>,
    },
    /// Every live connection.
    All,
}

impl TargetSelector {
    /// Convenience constructor for a room target.
    #[must_use]
    pub const fn room(room: RoomId) -> Self {
        Self::Room { room }
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room { room } => write!(f, "{room}"),
            Self::Connections { ids } => write!(f, "{} connection(s)", ids.len()),
            Self::All => f.write_str("all"),
        }
    }
}
