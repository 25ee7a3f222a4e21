//! Inbound event dispatch.
//!
//! Every client event passes through [`EventBus::dispatch`]:
//!
//! 1. the [`RuleTable`] decides whether the connection's role may emit it
//!    and whether the payload satisfies the rule's constraints;
//! 2. denials are audited and answered with `UNAUTHORIZED`, constraint
//!    failures with `VALIDATION_ERROR`;
//! 3. accepted events run their registered [`EventHandler`] in a task of
//!    their own, so a failing or panicking handler only fails that event;
//! 4. accepted events are published on a broadcast channel for external
//!    collaborators.
//!
//! Neither denied nor invalid events ever reach a handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::{
    AuditCategory, AuditRecord, Connection, ConnectionId, Decision, Role, RuleTable, Severity,
    UserId,
};
use crate::error::{EventError, HandlerError};

use super::AuditForwarder;

/// Inputs handed to an [`EventHandler`].
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Connection the event arrived on.
    pub connection: Arc<Connection>,
    /// Inbound event name.
    pub event_name: String,
    /// Validated payload.
    pub payload: serde_json::Value,
}

/// Domain logic bound to one inbound event name.
pub trait EventHandler: Send + Sync + fmt::Debug {
    /// Handles an authorized, validated event and returns the `data` of the
    /// acknowledgement.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Rejected`] is shown to the client as a validation
    /// error and counts toward the connection's validation failures;
    /// anything else becomes a generic internal error.
    fn handle(&self, ctx: HandlerContext) -> BoxFuture<'static, Result<serde_json::Value, HandlerError>>;
}

/// An accepted inbound event, as seen by external subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedEvent {
    /// Emitting connection.
    pub connection_id: ConnectionId,
    /// Emitting user.
    pub user_id: UserId,
    /// Emitter's role.
    pub role: Role,
    /// Inbound event name.
    pub event_name: String,
    /// Validated payload.
    pub payload: serde_json::Value,
    /// When the event was accepted.
    pub accepted_at: DateTime<Utc>,
}

/// Role-gated dispatcher for inbound events.
#[derive(Debug)]
pub struct EventBus {
    rules: Arc<RuleTable>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    accepted: broadcast::Sender<AcceptedEvent>,
    audit: AuditForwarder,
    validation_audit_threshold: u32,
}

impl EventBus {
    /// Creates a bus with no handlers.
    ///
    /// `capacity` bounds the accepted-event broadcast ring; lagging
    /// subscribers lose the oldest entries. Validation failures are audited
    /// once a connection has accumulated `validation_audit_threshold` of
    /// them.
    #[must_use]
    pub fn new(
        rules: Arc<RuleTable>,
        audit: AuditForwarder,
        capacity: usize,
        validation_audit_threshold: u32,
    ) -> Self {
        let (accepted, _) = broadcast::channel(capacity.max(1));
        Self {
            rules,
            handlers: HashMap::new(),
            accepted,
            audit,
            validation_audit_threshold: validation_audit_threshold.max(1),
        }
    }

    /// Binds `handler` to `event_name`, replacing any previous binding.
    #[must_use]
    pub fn with_handler(mut self, event_name: &str, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_name.to_string(), handler);
        self
    }

    /// The rule table consulted on every dispatch.
    #[must_use]
    pub const fn rules(&self) -> &Arc<RuleTable> {
        &self.rules
    }

    /// Subscribes to accepted events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AcceptedEvent> {
        self.accepted.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.accepted.receiver_count()
    }

    /// Authorizes, validates and handles one inbound event.
    ///
    /// # Errors
    ///
    /// Returns the [`EventError`] sent back to the client.
    pub async fn dispatch(
        &self,
        connection: &Arc<Connection>,
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, EventError> {
        match self.rules.authorize(connection, event_name, &payload).await {
            Decision::Allowed => {}
            Decision::Denied { required_roles } => {
                self.deny(connection, event_name, &required_roles);
                return Err(EventError::unauthorized(event_name, required_roles));
            }
            Decision::Invalid { message } => {
                self.reject(connection, event_name, &message);
                return Err(EventError::validation(event_name, message));
            }
        }

        let data = match self.handlers.get(event_name) {
            Some(handler) => {
                let ctx = HandlerContext {
                    connection: Arc::clone(connection),
                    event_name: event_name.to_string(),
                    payload: payload.clone(),
                };
                let outcome = tokio::spawn(handler.handle(ctx))
                    .await
                    .unwrap_or_else(|join| {
                        tracing::error!(
                            connection_id = %connection.id(),
                            event = event_name,
                            panicked = join.is_panic(),
                            "event handler aborted"
                        );
                        Err(HandlerError::Aborted)
                    });
                match outcome {
                    Ok(data) => data,
                    Err(HandlerError::Rejected(message)) => {
                        self.reject(connection, event_name, &message);
                        return Err(EventError::validation(event_name, message));
                    }
                    Err(err) => {
                        tracing::error!(
                            connection_id = %connection.id(),
                            event = event_name,
                            error = %err,
                            "event handler failed"
                        );
                        return Err(EventError::internal(event_name));
                    }
                }
            }
            None => serde_json::json!({ "accepted": true }),
        };

        let subscribers = self.accepted.send(AcceptedEvent {
            connection_id: connection.id(),
            user_id: connection.user_id().clone(),
            role: connection.role(),
            event_name: event_name.to_string(),
            payload,
            accepted_at: Utc::now(),
        });
        tracing::debug!(
            connection_id = %connection.id(),
            event = event_name,
            subscribers = subscribers.unwrap_or(0),
            "inbound event accepted"
        );
        Ok(data)
    }

    fn deny(&self, connection: &Connection, event_name: &str, required_roles: &[Role]) {
        tracing::warn!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            role = %connection.role(),
            event = event_name,
            "inbound event denied"
        );
        self.audit.forward(AuditRecord::new(
            connection.user_id().clone(),
            "authorization_denied",
            AuditCategory::Security,
            Severity::Medium,
            serde_json::json!({
                "event": event_name,
                "role": connection.role(),
                "requiredRoles": required_roles,
                "connectionId": connection.id(),
            }),
        ));
    }

    fn reject(&self, connection: &Connection, event_name: &str, message: &str) {
        let failures = connection.record_validation_failure();
        tracing::debug!(
            connection_id = %connection.id(),
            event = event_name,
            failures,
            reason = message,
            "inbound event failed validation"
        );
        if failures >= self.validation_audit_threshold {
            self.audit.forward(AuditRecord::new(
                connection.user_id().clone(),
                "repeated_validation_failure",
                AuditCategory::Security,
                Severity::Low,
                serde_json::json!({
                    "event": event_name,
                    "reason": message,
                    "failures": failures,
                    "connectionId": connection.id(),
                }),
            ));
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::audit::RecordingAuditSink;
    use crate::domain::{AuditSink, Identity, catalog};
    use crate::error::EventErrorCode;
    use crate::service::audit_forwarder::RetryPolicy;

    #[derive(Debug)]
    struct Echo;

    impl EventHandler for Echo {
        fn handle(
            &self,
            ctx: HandlerContext,
        ) -> BoxFuture<'static, Result<serde_json::Value, HandlerError>> {
            Box::pin(async move { Ok(ctx.payload) })
        }
    }

    #[derive(Debug)]
    struct Explodes;

    impl EventHandler for Explodes {
        fn handle(
            &self,
            ctx: HandlerContext,
        ) -> BoxFuture<'static, Result<serde_json::Value, HandlerError>> {
            Box::pin(async move {
                if ctx.payload.is_object() {
                    panic!("collaborator blew up");
                }
                Ok(ctx.payload)
            })
        }
    }

    #[derive(Debug)]
    struct Fails;

    impl EventHandler for Fails {
        fn handle(
            &self,
            _ctx: HandlerContext,
        ) -> BoxFuture<'static, Result<serde_json::Value, HandlerError>> {
            Box::pin(async { Err(HandlerError::Failed("db password expired".to_string())) })
        }
    }

    #[derive(Debug)]
    struct Refuses;

    impl EventHandler for Refuses {
        fn handle(
            &self,
            _ctx: HandlerContext,
        ) -> BoxFuture<'static, Result<serde_json::Value, HandlerError>> {
            Box::pin(async { Err(HandlerError::Rejected("Order o1 is already shipped".to_string())) })
        }
    }

    fn bus(threshold: u32) -> (EventBus, Arc<RecordingAuditSink>) {
        let sink = Arc::new(RecordingAuditSink::default());
        let (audit, _task) = AuditForwarder::spawn(
            Arc::clone(&sink) as Arc<dyn AuditSink>,
            64,
            RetryPolicy::default(),
        );
        let rules = Arc::new(RuleTable::with_rules(catalog::default_rules()));
        (EventBus::new(rules, audit, 16, threshold), sink)
    }

    fn conn(role: Role) -> Arc<Connection> {
        Arc::new(Connection::new(Identity {
            user_id: UserId::new("u1"),
            role,
            email: String::new(),
        }))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn seller_price_cap_is_enforced_but_admin_passes() {
        let (bus, _) = bus(3);
        let bus = bus.with_handler(catalog::SELLER_PRODUCT_CREATE, Arc::new(Echo));
        let payload = serde_json::json!({"name": "Vase", "price": 15000});

        let Err(err) = bus
            .dispatch(&conn(Role::Seller), catalog::SELLER_PRODUCT_CREATE, payload.clone())
            .await
        else {
            panic!("seller should be capped");
        };
        assert_eq!(err.code, EventErrorCode::ValidationError);
        assert_eq!(err.message, "Price exceeds maximum allowed for seller: 10000");

        let ok = bus
            .dispatch(&conn(Role::Admin), catalog::SELLER_PRODUCT_CREATE, payload.clone())
            .await;
        assert_eq!(ok, Ok(payload));
    }

    #[tokio::test]
    async fn denied_events_never_reach_handlers_and_are_audited() {
        let (bus, sink) = bus(3);
        let bus = bus.with_handler(catalog::ADMIN_BROADCAST, Arc::new(Explodes));
        let Err(err) = bus
            .dispatch(
                &conn(Role::Customer),
                catalog::ADMIN_BROADCAST,
                serde_json::json!({"room": "role:seller", "event": "x"}),
            )
            .await
        else {
            panic!("customer should be denied");
        };
        assert_eq!(err.code, EventErrorCode::Unauthorized);
        assert_eq!(err.required_roles, Some(vec![Role::Admin]));

        settle().await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(records.iter().all(|r| r.category == AuditCategory::Security));
    }

    #[tokio::test]
    async fn unknown_events_are_denied_by_default() {
        let (bus, _) = bus(3);
        let result = bus
            .dispatch(&conn(Role::Admin), "payments:refund", serde_json::json!({}))
            .await;
        assert!(matches!(
            result,
            Err(EventError {
                code: EventErrorCode::Unauthorized,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error() {
        let (bus, _) = bus(3);
        let bus = bus.with_handler(catalog::CRAFT_RECOGNIZE, Arc::new(Explodes));
        let result = bus
            .dispatch(
                &conn(Role::Seller),
                catalog::CRAFT_RECOGNIZE,
                serde_json::json!({"imageUrl": "https://cdn.example.com/a.jpg"}),
            )
            .await;
        assert_eq!(result, Err(EventError::internal(catalog::CRAFT_RECOGNIZE)));
    }

    #[tokio::test]
    async fn handler_failure_hides_detail() {
        let (bus, _) = bus(3);
        let bus = bus.with_handler(catalog::SEARCH_VOICE_START, Arc::new(Fails));
        let Err(err) = bus
            .dispatch(
                &conn(Role::Customer),
                catalog::SEARCH_VOICE_START,
                serde_json::json!({"sessionId": "s"}),
            )
            .await
        else {
            panic!("handler should fail");
        };
        assert!(!err.message.contains("password"));
    }

    #[tokio::test]
    async fn accepted_events_without_handler_are_published() {
        let (bus, _) = bus(3);
        let mut rx = bus.subscribe();
        let result = bus
            .dispatch(
                &conn(Role::Customer),
                catalog::ORDER_UPDATE_STATUS,
                serde_json::json!({"orderId": "o1", "status": "cancelled"}),
            )
            .await;
        assert_eq!(result, Ok(serde_json::json!({"accepted": true})));

        let Ok(event) = rx.try_recv() else {
            panic!("expected a published event");
        };
        assert_eq!(event.event_name, catalog::ORDER_UPDATE_STATUS);
        assert_eq!(event.role, Role::Customer);
    }

    #[tokio::test]
    async fn repeated_validation_failures_are_audited_after_threshold() {
        let (bus, sink) = bus(2);
        let seller = conn(Role::Seller);
        for _ in 0..3 {
            let _ = bus
                .dispatch(&seller, catalog::SELLER_PRODUCT_CREATE, serde_json::json!({}))
                .await;
        }
        settle().await;
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.severity == Severity::Low));
    }

    #[tokio::test]
    async fn handler_rejections_count_toward_the_audit_threshold() {
        let (bus, sink) = bus(1);
        let bus = bus.with_handler(catalog::ORDER_UPDATE_STATUS, Arc::new(Refuses));

        let Err(err) = bus
            .dispatch(
                &conn(Role::Customer),
                catalog::ORDER_UPDATE_STATUS,
                serde_json::json!({"orderId": "o1", "status": "cancelled"}),
            )
            .await
        else {
            panic!("handler should refuse");
        };
        assert_eq!(err.code, EventErrorCode::ValidationError);
        assert_eq!(err.message, "Order o1 is already shipped");

        settle().await;
        let records = sink.records();
        let [record] = records.as_slice() else {
            panic!("expected one audit record, got {}", records.len());
        };
        assert_eq!(record.action, "repeated_validation_failure");
        assert_eq!(record.metadata["reason"], "Order o1 is already shipped");
        assert_eq!(record.metadata["failures"], 1);
    }
}
