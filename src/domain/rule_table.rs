//! Deny-by-default authorization table.
//!
//! [`RuleTable`] maps event names to [`EventRule`]s. Reads clone the rule
//! `Arc` out of the lock and evaluate it without holding the lock, so a
//! concurrent rule replacement never tears an in-flight authorization.
//! Only the administrative service mutates the table; the inbound event
//! pipeline holds it read-only.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Connection, EventRule, Role};

/// Outcome of [`RuleTable::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Role permitted and payload valid.
    Allowed,
    /// No rule, or the role is not in the rule's allowed set.
    Denied {
        /// Roles that would have been allowed; empty for unknown events.
        required_roles: Vec<Role>,
    },
    /// Role permitted but the payload broke a constraint.
    Invalid {
        /// Client-facing reason.
        message: String,
    },
}

/// Runtime-mutable event rule store.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: RwLock<HashMap<String, Arc<EventRule>>>,
}

impl RuleTable {
    /// Creates an empty table. Every event is denied until a rule exists.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table pre-populated with `rules`.
    #[must_use]
    pub fn with_rules(rules: impl IntoIterator<Item = EventRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| (rule.event_name().to_string(), Arc::new(rule)))
            .collect();
        Self {
            rules: RwLock::new(rules),
        }
    }

    /// Authorizes `event_name` from `connection` and validates `payload`.
    ///
    /// Role membership is checked before any payload constraint runs.
    pub async fn authorize(
        &self,
        connection: &Connection,
        event_name: &str,
        payload: &serde_json::Value,
    ) -> Decision {
        let Some(rule) = self.get(event_name).await else {
            return Decision::Denied {
                required_roles: Vec::new(),
            };
        };
        if !rule.allows(connection.role()) {
            return Decision::Denied {
                required_roles: rule.allowed_roles().iter().copied().collect(),
            };
        }
        match rule.validation().check(connection, payload) {
            Ok(()) => Decision::Allowed,
            Err(message) => Decision::Invalid { message },
        }
    }

    /// Returns the rule for `event_name`, if any.
    pub async fn get(&self, event_name: &str) -> Option<Arc<EventRule>> {
        self.rules.read().await.get(event_name).cloned()
    }

    /// Inserts or replaces a rule, returning the previous one.
    pub async fn insert(&self, rule: EventRule) -> Option<Arc<EventRule>> {
        let name = rule.event_name().to_string();
        self.rules.write().await.insert(name, Arc::new(rule))
    }

    /// Removes the rule for `event_name`, returning it.
    pub async fn remove(&self, event_name: &str) -> Option<Arc<EventRule>> {
        self.rules.write().await.remove(event_name)
    }

    /// Every rule, sorted by event name.
    pub async fn list(&self) -> Vec<Arc<EventRule>> {
        let mut rules: Vec<Arc<EventRule>> = self.rules.read().await.values().cloned().collect();
        rules.sort_by(|a, b| a.event_name().cmp(b.event_name()));
        rules
    }

    /// Number of rules.
    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    /// Returns `true` when the table has no rules.
    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{Identity, UserId, Validation, catalog};

    fn conn(role: Role) -> Connection {
        Connection::new(Identity {
            user_id: UserId::new("u1"),
            role,
            email: "u1@example.com".to_string(),
        })
    }

    #[tokio::test]
    async fn unknown_events_are_denied_for_every_role() {
        let table = RuleTable::with_rules(catalog::default_rules());
        for role in Role::ALL {
            for event in ["unknown:event", "", "SELLER:PRODUCT_CREATE"] {
                let decision = table
                    .authorize(&conn(role), event, &serde_json::json!({}))
                    .await;
                assert_eq!(
                    decision,
                    Decision::Denied {
                        required_roles: Vec::new()
                    },
                    "{role} / {event}"
                );
            }
        }
    }

    #[tokio::test]
    async fn disallowed_role_reports_required_roles() {
        let table = RuleTable::with_rules(catalog::default_rules());
        let decision = table
            .authorize(
                &conn(Role::Customer),
                catalog::SELLER_PRODUCT_CREATE,
                &serde_json::json!({"name": "Vase", "price": 10}),
            )
            .await;
        assert_eq!(
            decision,
            Decision::Denied {
                required_roles: vec![Role::Admin, Role::Seller]
            }
        );
    }

    #[tokio::test]
    async fn denial_wins_over_invalid_payload() {
        let table = RuleTable::with_rules(catalog::default_rules());
        let decision = table
            .authorize(
                &conn(Role::Customer),
                catalog::SELLER_PRODUCT_CREATE,
                &serde_json::json!({}),
            )
            .await;
        assert!(matches!(decision, Decision::Denied { .. }));
    }

    #[tokio::test]
    async fn every_catalog_rule_accepts_valid_and_rejects_invalid_payloads() {
        let table = RuleTable::with_rules(catalog::default_rules());
        for rule in table.list().await {
            for role in rule.allowed_roles().iter().copied() {
                let c = conn(role);
                let valid = catalog::sample_payload(rule.event_name(), role);
                assert_eq!(
                    table.authorize(&c, rule.event_name(), &valid).await,
                    Decision::Allowed,
                    "{} as {role}",
                    rule.event_name()
                );
                assert!(
                    matches!(
                        table
                            .authorize(&c, rule.event_name(), &serde_json::json!({}))
                            .await,
                        Decision::Invalid { .. }
                    ),
                    "{} as {role} with empty payload",
                    rule.event_name()
                );
            }
        }
    }

    #[tokio::test]
    async fn insert_and_remove_change_decisions() {
        let table = RuleTable::new();
        let c = conn(Role::Customer);
        let payload = serde_json::json!({});
        assert!(matches!(
            table.authorize(&c, "wishlist:add", &payload).await,
            Decision::Denied { .. }
        ));

        let Ok(rule) = EventRule::new("wishlist:add", [Role::Customer], Validation::new()) else {
            panic!("valid rule");
        };
        assert!(table.insert(rule).await.is_none());
        assert_eq!(
            table.authorize(&c, "wishlist:add", &payload).await,
            Decision::Allowed
        );

        assert!(table.remove("wishlist:add").await.is_some());
        assert!(matches!(
            table.authorize(&c, "wishlist:add", &payload).await,
            Decision::Denied { .. }
        ));
        assert!(table.is_empty().await);
    }
}
