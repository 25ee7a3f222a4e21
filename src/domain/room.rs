//! Broadcast groups.
//!
//! Two kinds of room exist: `user:<id>` for targeted pushes and
//! `role:<role>` for fan-out announcements. Membership is derived from the
//! connection identity at admission and never changes afterward.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Role, UserId};

/// Named broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomId {
    /// Every connection of a single user.
    User(UserId),
    /// Every connection holding a role.
    Role(Role),
}

impl RoomId {
    /// Rooms a connection with this identity joins at admission.
    #[must_use]
    pub fn for_identity(user_id: &UserId, role: Role) -> [Self; 2] {
        [Self::User(user_id.clone()), Self::Role(role)]
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Role(role) => write!(f, "role:{role}"),
        }
    }
}

/// Returned for room names that are neither `user:<id>` nor `role:<role>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid room name: {0}")]
pub struct InvalidRoom(pub String);

impl FromStr for RoomId {
    type Err = InvalidRoom;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", id)) if !id.is_empty() => Ok(Self::User(UserId::new(id))),
            Some(("role", role)) => role
                .parse::<Role>()
                .map(Self::Role)
                .map_err(|_| InvalidRoom(s.to_string())),
            _ => Err(InvalidRoom(s.to_string())),
        }
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefixed_names() {
        assert_eq!(RoomId::User(UserId::new("42")).to_string(), "user:42");
        assert_eq!(RoomId::Role(Role::Seller).to_string(), "role:seller");
    }

    #[test]
    fn parse_accepts_both_kinds() {
        assert_eq!(
            "user:abc".parse::<RoomId>(),
            Ok(RoomId::User(UserId::new("abc")))
        );
        assert_eq!("role:admin".parse::<RoomId>(), Ok(RoomId::Role(Role::Admin)));
    }

    #[test]
    fn parse_rejects_unknown_prefixes_and_roles() {
        assert!("team:1".parse::<RoomId>().is_err());
        assert!("role:wizard".parse::<RoomId>().is_err());
        assert!("user:".parse::<RoomId>().is_err());
    }

    #[test]
    fn user_ids_may_contain_colons() {
        assert_eq!(
            "user:a:b".parse::<RoomId>(),
            Ok(RoomId::User(UserId::new("a:b")))
        );
    }
}
