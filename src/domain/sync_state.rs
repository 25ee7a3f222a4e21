//! Client-side delivery mode.
//!
//! A client is either receiving pushes over a live connection or polling
//! the reconciliation endpoint. It starts [`SyncState::Disconnected`] and
//! only stops for good after an explicit logout. Polling resumes from the
//! last notification timestamp the client actually processed, so a drop
//! never opens a gap; duplicates are expected and filtered by id.

use chrono::{DateTime, Utc};

/// Delivery mode observed by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No live connection; poll with `since`.
    Disconnected {
        /// Last processed notification timestamp, `None` before the first.
        since: Option<DateTime<Utc>>,
    },
    /// Live connection admitted; pushes only.
    Connected {
        /// Last processed notification timestamp.
        since: Option<DateTime<Utc>>,
    },
    /// A fresh handshake is in progress; polling continues meanwhile.
    Reconnecting {
        /// Last processed notification timestamp.
        since: Option<DateTime<Utc>>,
    },
    /// Terminal.
    LoggedOut,
}

/// Inputs that move a [`SyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// The server sent `connection:ready`.
    Admitted,
    /// The live transport closed or a liveness ping went unanswered.
    ConnectionLost,
    /// The client started a new handshake.
    Reconnect,
    /// A notification with this timestamp was processed.
    Processed(DateTime<Utc>),
    /// The user logged out.
    Logout,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::Disconnected { since: None }
    }
}

impl SyncState {
    /// Applies `signal`, returning the next state.
    #[must_use]
    pub fn on(self, signal: SyncSignal) -> Self {
        let since = self.since();
        match (self, signal) {
            (Self::LoggedOut, _) => Self::LoggedOut,
            (_, SyncSignal::Logout) => Self::LoggedOut,
            (_, SyncSignal::Processed(at)) => self.with_since(since.map_or(at, |s| s.max(at))),
            (Self::Disconnected { .. } | Self::Reconnecting { .. }, SyncSignal::Admitted) => {
                Self::Connected { since }
            }
            (Self::Connected { .. } | Self::Reconnecting { .. }, SyncSignal::ConnectionLost) => {
                Self::Disconnected { since }
            }
            (Self::Disconnected { .. }, SyncSignal::Reconnect) => Self::Reconnecting { since },
            (state, _) => state,
        }
    }

    /// Returns `true` when the client should poll the reconciliation
    /// endpoint.
    #[must_use]
    pub const fn should_poll(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::Reconnecting { .. })
    }

    /// Cursor to pass as `since` on the next poll.
    #[must_use]
    pub const fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Disconnected { since } | Self::Connected { since } | Self::Reconnecting { since } => {
                *since
            }
            Self::LoggedOut => None,
        }
    }

    const fn with_since(self, at: DateTime<Utc>) -> Self {
        let since = Some(at);
        match self {
            Self::Disconnected { .. } => Self::Disconnected { since },
            Self::Connected { .. } => Self::Connected { since },
            Self::Reconnecting { .. } => Self::Reconnecting { since },
            Self::LoggedOut => Self::LoggedOut,
        }
    }
}
