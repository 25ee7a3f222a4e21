//! Administrative operations shared by the HTTP surface and the
//! `admin:*` inbound events.

use std::sync::Arc;

use crate::domain::{
    AuditCategory, AuditRecord, ConnectionId, ConnectionRegistry, ConnectionSummary,
    DeliveryReport, EventRule, EvictionReason, Identity, OutboundEvent, Role, RoomId, RuleError,
    RuleSpec, RuleTable, Severity, TargetSelector,
};
use crate::error::RealtimeError;

use super::{AuditForwarder, ConnectionGate};

/// Rule table mutation, forced eviction and broadcast, all admin-only.
#[derive(Debug, Clone)]
pub struct AdminService {
    rules: Arc<RuleTable>,
    gate: ConnectionGate,
    audit: AuditForwarder,
}

impl AdminService {
    /// Creates the service.
    #[must_use]
    pub fn new(rules: Arc<RuleTable>, gate: ConnectionGate, audit: AuditForwarder) -> Self {
        Self { rules, gate, audit }
    }

    fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.gate.registry()
    }

    /// Every installed rule.
    pub async fn list_rules(&self) -> Vec<Arc<EventRule>> {
        self.rules.list().await
    }

    /// Installs or replaces a rule.
    ///
    /// Returns `true` when an existing rule was replaced.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Forbidden`] for non-admins and
    /// [`RealtimeError::Rule`] when the rule is malformed or names an
    /// unknown role.
    pub async fn upsert_rule(&self, actor: &Identity, spec: RuleSpec) -> Result<bool, RealtimeError> {
        require_admin(actor)?;
        let rule = EventRule::try_from(spec)?;
        let event = rule.event_name().to_string();
        let roles: Vec<Role> = rule.allowed_roles().iter().copied().collect();
        let replaced = self.rules.insert(rule).await.is_some();

        tracing::info!(actor = %actor.user_id, %event, replaced, "event rule installed");
        self.audit.forward(AuditRecord::new(
            actor.user_id.clone(),
            if replaced { "rule_replaced" } else { "rule_added" },
            AuditCategory::Administration,
            Severity::Medium,
            serde_json::json!({ "event": event, "allowedRoles": roles }),
        ));
        Ok(replaced)
    }

    /// Deletes the rule for `event_name`; the event is denied afterward.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Forbidden`] for non-admins and
    /// [`RuleError::NotFound`] when no such rule exists.
    pub async fn remove_rule(&self, actor: &Identity, event_name: &str) -> Result<(), RealtimeError> {
        require_admin(actor)?;
        if self.rules.remove(event_name).await.is_none() {
            return Err(RuleError::NotFound(event_name.to_string()).into());
        }
        tracing::info!(actor = %actor.user_id, event = event_name, "event rule removed");
        self.audit.forward(AuditRecord::new(
            actor.user_id.clone(),
            "rule_removed",
            AuditCategory::Administration,
            Severity::High,
            serde_json::json!({ "event": event_name }),
        ));
        Ok(())
    }

    /// Every live connection.
    pub async fn list_connections(&self) -> Vec<ConnectionSummary> {
        self.registry().list().await
    }

    /// Forcibly evicts `target`.
    ///
    /// `origin` is the connection the request arrived on, if any; an
    /// administrator may not evict it.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Forbidden`] for non-admins,
    /// [`RealtimeError::Validation`] for a self-eviction and
    /// [`RealtimeError::ConnectionNotFound`] for unknown ids.
    pub async fn evict_connection(
        &self,
        actor: &Identity,
        origin: Option<ConnectionId>,
        target: ConnectionId,
    ) -> Result<ConnectionSummary, RealtimeError> {
        require_admin(actor)?;
        if origin == Some(target) {
            return Err(RealtimeError::Validation(
                "Cannot target your own connection".to_string(),
            ));
        }
        let reason = EvictionReason::Administrative {
            actor: actor.user_id.clone(),
        };
        self.gate
            .evict(target, reason)
            .await
            .map(|connection| connection.summary())
            .ok_or(RealtimeError::ConnectionNotFound(target))
    }

    /// Pushes `event` with `payload` to `room`, or to everyone when `room`
    /// is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Forbidden`] for non-admins and
    /// [`RealtimeError::InvalidRequest`] for an empty event name.
    pub async fn broadcast(
        &self,
        actor: &Identity,
        room: Option<RoomId>,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<DeliveryReport, RealtimeError> {
        require_admin(actor)?;
        if event.trim().is_empty() {
            return Err(RealtimeError::InvalidRequest(
                "event name is required".to_string(),
            ));
        }
        let target = room.map_or(TargetSelector::All, TargetSelector::room);
        let report = self
            .registry()
            .deliver(&target, OutboundEvent::new(event, payload))
            .await;
        tracing::info!(
            actor = %actor.user_id,
            selector = %target,
            event,
            delivered = report.delivered,
            "administrative broadcast"
        );
        self.audit.forward(AuditRecord::new(
            actor.user_id.clone(),
            "broadcast_sent",
            AuditCategory::Administration,
            Severity::Low,
            serde_json::json!({
                "target": target.to_string(),
                "event": event,
                "delivered": report.delivered,
            }),
        ));
        Ok(report)
    }
}

fn require_admin(actor: &Identity) -> Result<(), RealtimeError> {
    if actor.role == Role::Admin {
        Ok(())
    } else {
        Err(RealtimeError::Forbidden {
            required_roles: vec![Role::Admin],
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::JwtVerifier;
    use crate::domain::audit::RecordingAuditSink;
    use crate::domain::{AuditSink, Constraint, ConnectionCommand, UserId, catalog};
    use crate::service::audit_forwarder::RetryPolicy;

    struct Fixture {
        admin: AdminService,
        rules: Arc<RuleTable>,
        registry: Arc<ConnectionRegistry>,
        sink: Arc<RecordingAuditSink>,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(RecordingAuditSink::default());
        let (audit, _task) = AuditForwarder::spawn(
            Arc::clone(&sink) as Arc<dyn AuditSink>,
            16,
            RetryPolicy::default(),
        );
        let registry = Arc::new(ConnectionRegistry::new(16));
        let gate = ConnectionGate::new(
            Arc::new(JwtVerifier::new(b"s", None)),
            Arc::clone(&registry),
            audit.clone(),
        );
        let rules = Arc::new(RuleTable::with_rules(catalog::default_rules()));
        Fixture {
            admin: AdminService::new(Arc::clone(&rules), gate, audit),
            rules,
            registry,
            sink,
        }
    }

    fn identity(user: &str, role: Role) -> Identity {
        Identity {
            user_id: UserId::new(user),
            role,
            email: String::new(),
        }
    }

    fn spec(event: &str, roles: &[&str]) -> RuleSpec {
        RuleSpec {
            event_name: event.to_string(),
            allowed_roles: roles.iter().map(|r| (*r).to_string()).collect(),
            common: vec![Constraint::Required {
                field: "id".to_string(),
            }],
            per_role: std::collections::BTreeMap::new(),
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn rule_mutations_are_applied_and_audited() {
        let fx = fixture();
        let admin = identity("admin-1", Role::Admin);

        let replaced = fx.admin.upsert_rule(&admin, spec("review:flag", &["customer"])).await;
        assert!(matches!(replaced, Ok(false)));
        assert!(fx.rules.get("review:flag").await.is_some());

        assert!(fx.admin.remove_rule(&admin, "review:flag").await.is_ok());
        assert!(fx.rules.get("review:flag").await.is_none());

        settle().await;
        let actions: Vec<String> = fx.sink.records().into_iter().map(|r| r.action).collect();
        assert_eq!(actions, ["rule_added", "rule_removed"]);
    }

    #[tokio::test]
    async fn unknown_roles_and_missing_rules_are_rejected() {
        let fx = fixture();
        let admin = identity("admin-1", Role::Admin);

        let result = fx.admin.upsert_rule(&admin, spec("x:y", &["wizard"])).await;
        assert!(matches!(
            result,
            Err(RealtimeError::Rule(RuleError::UnknownRole(_)))
        ));
        let result = fx.admin.remove_rule(&admin, "never:installed").await;
        assert!(matches!(
            result,
            Err(RealtimeError::Rule(RuleError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn non_admins_cannot_mutate_rules() {
        let fx = fixture();
        let moderator = identity("mod-1", Role::Moderator);
        let result = fx.admin.remove_rule(&moderator, catalog::ADMIN_BROADCAST).await;
        assert!(matches!(result, Err(RealtimeError::Forbidden { .. })));
        assert!(fx.rules.get(catalog::ADMIN_BROADCAST).await.is_some());
    }

    #[tokio::test]
    async fn eviction_rejects_self_and_unknown_targets() {
        let fx = fixture();
        let admin = identity("admin-1", Role::Admin);
        let (own, _own_rx) = fx.registry.register(admin.clone()).await;
        let (target, mut target_rx) = fx.registry.register(identity("c1", Role::Customer)).await;

        let own_result = fx.admin.evict_connection(&admin, Some(own.id()), own.id()).await;
        assert!(matches!(own_result, Err(RealtimeError::Validation(_))));

        let missing = fx
            .admin
            .evict_connection(&admin, Some(own.id()), ConnectionId::new())
            .await;
        assert!(matches!(missing, Err(RealtimeError::ConnectionNotFound(_))));

        let evicted = fx
            .admin
            .evict_connection(&admin, Some(own.id()), target.id())
            .await;
        assert!(evicted.is_ok());
        assert!(matches!(
            target_rx.try_recv(),
            Ok(ConnectionCommand::Close(EvictionReason::Administrative { .. }))
        ));
    }

    #[tokio::test]
    async fn broadcast_targets_one_room() {
        let fx = fixture();
        let admin = identity("admin-1", Role::Admin);
        let (_s, mut seller_rx) = fx.registry.register(identity("s1", Role::Seller)).await;
        let (_c, mut customer_rx) = fx.registry.register(identity("c1", Role::Customer)).await;

        let report = fx
            .admin
            .broadcast(
                &admin,
                Some(RoomId::Role(Role::Seller)),
                catalog::SYSTEM_ANNOUNCEMENT,
                serde_json::json!({"message": "maintenance at 02:00"}),
            )
            .await;
        assert!(matches!(report, Ok(r) if r.delivered == 1));
        assert!(seller_rx.try_recv().is_ok());
        assert!(customer_rx.try_recv().is_err());
    }
}
