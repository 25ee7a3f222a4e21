//! Row shapes read from the marketplace tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Notification, ReviewDecision, SourcedUpdate};

/// A decided row from `product_moderation`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModerationRow {
    /// Reviewed product.
    pub product_id: String,
    /// Product name at review time.
    pub product_name: String,
    /// `approved` or `rejected`.
    pub decision: String,
    /// Reviewer note for rejections.
    pub reason: Option<String>,
    /// Decision timestamp.
    pub decided_at: DateTime<Utc>,
}

impl ModerationRow {
    /// Converts the row; rows with an unrecognised decision are skipped.
    #[must_use]
    pub fn into_notification(self) -> Option<Notification> {
        let decision = ReviewDecision::parse(&self.decision)?;
        Some(Notification::moderation_decision(
            &self.product_id,
            &self.product_name,
            decision,
            self.reason.as_deref(),
            self.decided_at,
        ))
    }

    /// Converts the row, keyed by its decision time.
    #[must_use]
    pub fn into_update(self) -> Option<SourcedUpdate> {
        let at = self.decided_at;
        self.into_notification()
            .map(|notification| SourcedUpdate { at, notification })
    }
}

/// A decided row from `seller_applications`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApplicationRow {
    /// Application identifier.
    pub application_id: String,
    /// `approved` or `rejected`.
    pub decision: String,
    /// Reviewer note.
    pub note: Option<String>,
    /// Decision timestamp.
    pub decided_at: DateTime<Utc>,
}

impl ApplicationRow {
    /// Converts the row; rows with an unrecognised decision are skipped.
    #[must_use]
    pub fn into_notification(self) -> Option<Notification> {
        let decision = ReviewDecision::parse(&self.decision)?;
        Some(Notification::seller_application(
            &self.application_id,
            decision,
            self.note.as_deref(),
            self.decided_at,
        ))
    }

    /// Converts the row, keyed by its decision time.
    #[must_use]
    pub fn into_update(self) -> Option<SourcedUpdate> {
        let at = self.decided_at;
        self.into_notification()
            .map(|notification| SourcedUpdate { at, notification })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn moderation_row_becomes_decision_notification() {
        let row = ModerationRow {
            product_id: "p-1".to_string(),
            product_name: "Blue vase".to_string(),
            decision: "rejected".to_string(),
            reason: Some("blurry photos".to_string()),
            decided_at: Utc::now(),
        };
        let Some(note) = row.into_notification() else {
            panic!("decided row should convert");
        };
        assert_eq!(note.notification_type, "moderation:decision");
        assert!(note.message.contains("blurry photos"));
    }

    #[test]
    fn update_ids_match_the_keyset_query() {
        let decided_at = Utc::now();
        let millis = decided_at.timestamp_millis();

        let Some(moderation) = (ModerationRow {
            product_id: "p-1".to_string(),
            product_name: "Blue vase".to_string(),
            decision: "approved".to_string(),
            reason: None,
            decided_at,
        })
        .into_update() else {
            panic!("decided row should convert");
        };
        assert_eq!(moderation.at, decided_at);
        assert_eq!(moderation.notification.id, format!("moderation:p-1:{millis}"));

        let Some(application) = (ApplicationRow {
            application_id: "a-1".to_string(),
            decision: "approved".to_string(),
            note: None,
            decided_at,
        })
        .into_update() else {
            panic!("decided row should convert");
        };
        assert_eq!(
            application.notification.id,
            format!("seller-application:a-1:{millis}")
        );
    }

    #[test]
    fn pending_application_is_skipped() {
        let row = ApplicationRow {
            application_id: "a-1".to_string(),
            decision: "pending".to_string(),
            note: None,
            decided_at: Utc::now(),
        };
        assert!(row.into_notification().is_none());
    }
}
