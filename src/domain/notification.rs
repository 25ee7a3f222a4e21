//! Logical notification shape shared by the live channel and the
//! reconciliation endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::catalog;

/// Display priority hint for clients.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Informational.
    Low,
    /// Default.
    Medium,
    /// Needs attention.
    High,
    /// Needs immediate attention.
    Urgent,
}

/// A user-visible state-change notification.
///
/// `id` is derived from the underlying mutation so the same change produces
/// the same id whether it arrives live or through reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    /// Stable identifier of the underlying change.
    pub id: String,
    /// Outbound event name this notification travels under.
    #[serde(rename = "type")]
    pub notification_type: String,
    /// Short title.
    pub title: String,
    /// Human-readable message.
    pub message: String,
    /// Structured payload.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    /// When the underlying change happened.
    pub timestamp: DateTime<Utc>,
    /// Display priority.
    pub priority: Priority,
}

/// Outcome of a moderation review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Accepted.
    Approved,
    /// Declined.
    Rejected,
}

impl ReviewDecision {
    /// Parses a stored decision string; anything else is not a decision yet.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl Notification {
    /// Moderation decision on a seller's product.
    #[must_use]
    pub fn moderation_decision(
        product_id: &str,
        product_name: &str,
        decision: ReviewDecision,
        reason: Option<&str>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        let (title, message, priority) = match decision {
            ReviewDecision::Approved => (
                "Product approved",
                format!("Your product \"{product_name}\" is now live on the marketplace."),
                Priority::Medium,
            ),
            ReviewDecision::Rejected => (
                "Product rejected",
                match reason {
                    Some(reason) => {
                        format!("Your product \"{product_name}\" was rejected: {reason}")
                    }
                    None => format!("Your product \"{product_name}\" was rejected."),
                },
                Priority::High,
            ),
        };
        Self {
            id: format!(
                "moderation:{product_id}:{}",
                decided_at.timestamp_millis()
            ),
            notification_type: catalog::MODERATION_DECISION.to_string(),
            title: title.to_string(),
            message,
            data: serde_json::json!({
                "productId": product_id,
                "productName": product_name,
                "decision": decision.as_str(),
                "reason": reason,
            }),
            timestamp: decided_at,
            priority,
        }
    }

    /// Decision on a seller application.
    #[must_use]
    pub fn seller_application(
        application_id: &str,
        decision: ReviewDecision,
        note: Option<&str>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        let (title, message, priority) = match decision {
            ReviewDecision::Approved => (
                "Seller application approved",
                "You can now list crafts for sale.".to_string(),
                Priority::High,
            ),
            ReviewDecision::Rejected => (
                "Seller application rejected",
                note.map_or_else(
                    || "Your seller application was not approved.".to_string(),
                    |note| format!("Your seller application was not approved: {note}"),
                ),
                Priority::High,
            ),
        };
        Self {
            id: format!(
                "seller-application:{application_id}:{}",
                decided_at.timestamp_millis()
            ),
            notification_type: catalog::SELLER_APPLICATION_STATUS.to_string(),
            title: title.to_string(),
            message,
            data: serde_json::json!({
                "applicationId": application_id,
                "decision": decision.as_str(),
                "note": note,
            }),
            timestamp: decided_at,
            priority,
        }
    }

    /// Result of the craft recognition service for an uploaded image.
    #[must_use]
    pub fn craft_recognition(
        request_id: &str,
        top_class: &str,
        confidence: f64,
        predictions: serde_json::Value,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("craft-recognition:{request_id}"),
            notification_type: catalog::CRAFT_RECOGNITION_RESULT.to_string(),
            title: "Craft recognized".to_string(),
            message: format!(
                "Looks like {top_class} ({:.0}% confidence).",
                confidence * 100.0
            ),
            data: serde_json::json!({
                "requestId": request_id,
                "topPrediction": {"class": top_class, "confidence": confidence},
                "predictions": predictions,
            }),
            timestamp: finished_at,
            priority: Priority::Low,
        }
    }

    /// Free-form notification under `notification:new`.
    #[must_use]
    pub fn general(
        id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            notification_type: catalog::NOTIFICATION_NEW.to_string(),
            title: title.into(),
            message: message.into(),
            data,
            timestamp: Utc::now(),
            priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moderation_id_is_stable_for_the_same_change() {
        let at = Utc::now();
        let a = Notification::moderation_decision("p1", "Vase", ReviewDecision::Approved, None, at);
        let b = Notification::moderation_decision("p1", "Vase", ReviewDecision::Approved, None, at);
        assert_eq!(a.id, b.id);
        assert_eq!(a.notification_type, "moderation:decision");
    }

    #[test]
    fn rejection_carries_reason_and_high_priority() {
        let n = Notification::moderation_decision(
            "p1",
            "Vase",
            ReviewDecision::Rejected,
            Some("blurry photos"),
            Utc::now(),
        );
        assert_eq!(n.priority, Priority::High);
        assert!(n.message.contains("blurry photos"));
        assert_eq!(n.data["decision"], "rejected");
    }

    #[test]
    fn serializes_type_field() {
        let n = Notification::general("n1", "Hi", "Hello", serde_json::json!({}), Priority::Low);
        let json = serde_json::to_value(&n).unwrap_or_default();
        assert_eq!(json["type"], "notification:new");
        assert_eq!(json["priority"], "low");
    }

    #[test]
    fn decision_parse_ignores_pending() {
        assert_eq!(ReviewDecision::parse("Approved"), Some(ReviewDecision::Approved));
        assert_eq!(ReviewDecision::parse("pending"), None);
    }

    #[test]
    fn recognition_message_shows_percentage() {
        let n = Notification::craft_recognition(
            "r1",
            "pottery",
            0.85,
            serde_json::json!([]),
            Utc::now(),
        );
        assert_eq!(n.message, "Looks like pottery (85% confidence).");
    }
}
