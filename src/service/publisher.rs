//! Entry point for domain code pushing state changes to clients.

use std::sync::Arc;

use crate::domain::{
    ConnectionRegistry, DeliveryReport, EmitOutcome, Notification, NotificationJournal,
    OutboundEvent, Role, RoomId, TargetSelector, Throttler, UserId,
};

/// Publishes notifications over the live channel.
///
/// [`notify_user`](Self::notify_user) and [`notify_role`](Self::notify_role)
/// are direct and ordered: the notification is journaled for
/// reconciliation, then queued on every matching connection.
/// [`emit`](Self::emit) goes through the [`Throttler`] and is meant for
/// high-frequency broadcast types such as analytics.
#[derive(Debug, Clone)]
pub struct NotificationPublisher {
    registry: Arc<ConnectionRegistry>,
    journal: Arc<NotificationJournal>,
    throttler: Throttler,
}

impl NotificationPublisher {
    /// Creates a publisher.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        journal: Arc<NotificationJournal>,
        throttler: Throttler,
    ) -> Self {
        Self {
            registry,
            journal,
            throttler,
        }
    }

    /// Sends `notification` to every connection of `user_id`.
    pub async fn notify_user(&self, user_id: &UserId, notification: Notification) -> DeliveryReport {
        self.notify_room(RoomId::User(user_id.clone()), notification)
            .await
    }

    /// Sends `notification` to every connection holding `role`.
    pub async fn notify_role(&self, role: Role, notification: Notification) -> DeliveryReport {
        self.notify_room(RoomId::Role(role), notification).await
    }

    /// Throttled emission of `payload` as `event_type`.
    pub async fn emit(
        &self,
        event_type: &str,
        target: TargetSelector,
        payload: serde_json::Value,
    ) -> EmitOutcome {
        self.throttler.emit(event_type, target, payload).await
    }

    async fn notify_room(&self, room: RoomId, notification: Notification) -> DeliveryReport {
        let payload = match serde_json::to_value(&notification) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(id = %notification.id, error = %err, "notification not serializable");
                return DeliveryReport::default();
            }
        };
        let event_name = notification.notification_type.clone();
        let id = notification.id.clone();
        self.journal.record(&room, notification).await;

        let report = self
            .registry
            .deliver(
                &TargetSelector::room(room.clone()),
                OutboundEvent::new(event_name.as_str(), payload),
            )
            .await;
        tracing::debug!(
            %room,
            event = %event_name,
            notification_id = %id,
            delivered = report.delivered,
            dropped = report.dropped,
            "notification published"
        );
        report
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;

    use crate::domain::{ConnectionCommand, Identity, ReviewDecision, SourceQuery, ThrottleConfig};

    fn publisher() -> (NotificationPublisher, Arc<ConnectionRegistry>, Arc<NotificationJournal>) {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let journal = Arc::new(NotificationJournal::new(50, chrono::Duration::hours(1)));
        let throttler = Throttler::new(
            Arc::clone(&registry),
            ThrottleConfig::new(Duration::from_secs(1)),
        );
        (
            NotificationPublisher::new(Arc::clone(&registry), Arc::clone(&journal), throttler),
            registry,
            journal,
        )
    }

    fn seller(user: &str) -> Identity {
        Identity {
            user_id: UserId::new(user),
            role: Role::Seller,
            email: String::new(),
        }
    }

    #[tokio::test]
    async fn user_notification_is_journaled_and_delivered() {
        let (publisher, registry, journal) = publisher();
        let (_conn, mut rx) = registry.register(seller("s1")).await;
        let (_other, mut other_rx) = registry.register(seller("s2")).await;

        let note = Notification::moderation_decision(
            "p1",
            "Vase",
            ReviewDecision::Approved,
            None,
            Utc::now(),
        );
        let report = publisher.notify_user(&UserId::new("s1"), note.clone()).await;
        assert_eq!(report.delivered, 1);

        match rx.try_recv() {
            Ok(ConnectionCommand::Deliver(event)) => {
                assert_eq!(event.event_name, "moderation:decision");
                assert_eq!(event.payload["id"], note.id.as_str());
            }
            other => panic!("expected delivery, got {other:?}"),
        }
        assert!(other_rx.try_recv().is_err());

        let query = SourceQuery {
            since: Utc::now() - chrono::Duration::minutes(1),
            after: None,
            limit: 10,
        };
        let journaled: Vec<Notification> = journal
            .window(&seller("s1"), &query)
            .await
            .into_iter()
            .map(|u| u.notification)
            .collect();
        assert_eq!(journaled, vec![note]);
    }

    #[tokio::test]
    async fn offline_user_still_gets_a_journal_entry() {
        let (publisher, _registry, journal) = publisher();
        let note = Notification::seller_application("app-1", ReviewDecision::Rejected, None, Utc::now());
        let report = publisher.notify_user(&UserId::new("ghost"), note).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(journal.len().await, 1);
    }

    #[tokio::test]
    async fn role_notification_reaches_every_member() {
        let (publisher, registry, _journal) = publisher();
        let (_a, _rx_a) = registry.register(seller("s1")).await;
        let (_b, _rx_b) = registry.register(seller("s2")).await;
        let note = Notification::general(
            "promo",
            "Fees",
            "Listing fees drop next week",
            serde_json::Value::Null,
            crate::domain::Priority::Low,
        );
        assert_eq!(publisher.notify_role(Role::Seller, note).await.delivered, 2);
    }
}
