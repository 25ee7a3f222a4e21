//! Built-in marketplace event catalogue.
//!
//! Inbound event names with the rules installed at startup, plus the
//! outbound event names the server pushes.

use super::{Constraint, EventRule, Role, SelfTarget, Validation};

/// Seller lists a new product.
pub const SELLER_PRODUCT_CREATE: &str = "seller:product_create";
/// Seller edits a listing.
pub const SELLER_PRODUCT_UPDATE: &str = "seller:product_update";
/// Order status transition.
pub const ORDER_UPDATE_STATUS: &str = "order:update_status";
/// Moderator decision on a listing.
pub const MODERATION_REVIEW_PRODUCT: &str = "moderation:review_product";
/// Request craft recognition for an uploaded image.
pub const CRAFT_RECOGNIZE: &str = "craft:recognize";
/// Start a voice search session.
pub const SEARCH_VOICE_START: &str = "search:voice_start";
/// Mark a notification as read.
pub const NOTIFICATION_MARK_READ: &str = "notification:mark_read";
/// Force-evict another connection.
pub const ADMIN_EVICT_CONNECTION: &str = "admin:evict_connection";
/// Broadcast an arbitrary event to a room.
pub const ADMIN_BROADCAST: &str = "admin:broadcast";

/// Sent to a connection right after admission.
pub const CONNECTION_READY: &str = "connection:ready";
/// Generic user notification.
pub const NOTIFICATION_NEW: &str = "notification:new";
/// Listing approved or rejected.
pub const MODERATION_DECISION: &str = "moderation:decision";
/// Seller application approved or rejected.
pub const SELLER_APPLICATION_STATUS: &str = "seller:application_status";
/// Craft recognition finished.
pub const CRAFT_RECOGNITION_RESULT: &str = "craft:recognition_result";
/// Voice search progress.
pub const SEARCH_PROGRESS: &str = "search:progress";
/// Periodic dashboard analytics snapshot.
pub const ANALYTICS_UPDATE: &str = "analytics:update";
/// Administrative announcement.
pub const SYSTEM_ANNOUNCEMENT: &str = "system:announcement";

/// Price ceiling for sellers.
pub const SELLER_PRICE_CAP: f64 = 10_000.0;
/// Price ceiling for administrators.
pub const ADMIN_PRICE_CAP: f64 = 1_000_000.0;

/// Order statuses each role may set.
const CUSTOMER_ORDER_STATUSES: &[&str] = &["cancelled"];
const SELLER_ORDER_STATUSES: &[&str] = &["processing", "shipped"];
const ADMIN_ORDER_STATUSES: &[&str] = &["pending", "processing", "shipped", "delivered", "cancelled"];

fn required(field: &str) -> Constraint {
    Constraint::Required {
        field: field.to_string(),
    }
}

fn max(field: &str, max: f64) -> Constraint {
    Constraint::Max {
        field: field.to_string(),
        max,
    }
}

fn min(field: &str, min: f64) -> Constraint {
    Constraint::Min {
        field: field.to_string(),
        min,
    }
}

fn one_of(field: &str, values: &[&str]) -> Constraint {
    Constraint::OneOf {
        field: field.to_string(),
        values: values.iter().map(|v| (*v).to_string()).collect(),
    }
}

fn price_caps(validation: Validation) -> Validation {
    validation
        .common(min("price", 0.0))
        .for_role(Role::Seller, max("price", SELLER_PRICE_CAP))
        .for_role(Role::Admin, max("price", ADMIN_PRICE_CAP))
}

/// Rules installed at startup.
#[must_use]
pub fn default_rules() -> Vec<EventRule> {
    use Role::{Admin, Customer, Moderator, Seller};

    let candidates = [
        EventRule::new(
            SELLER_PRODUCT_CREATE,
            [Seller, Admin],
            price_caps(Validation::new().common(required("name")).common(required("price"))),
        ),
        EventRule::new(
            SELLER_PRODUCT_UPDATE,
            [Seller, Admin],
            price_caps(Validation::new().common(required("productId"))),
        ),
        EventRule::new(
            ORDER_UPDATE_STATUS,
            [Customer, Seller, Admin],
            Validation::new()
                .common(required("orderId"))
                .common(required("status"))
                .for_role(Customer, one_of("status", CUSTOMER_ORDER_STATUSES))
                .for_role(Seller, one_of("status", SELLER_ORDER_STATUSES))
                .for_role(Admin, one_of("status", ADMIN_ORDER_STATUSES)),
        ),
        EventRule::new(
            MODERATION_REVIEW_PRODUCT,
            [Moderator, Admin],
            Validation::new()
                .common(required("productId"))
                .common(required("decision"))
                .common(one_of("decision", &["approved", "rejected"])),
        ),
        EventRule::new(
            CRAFT_RECOGNIZE,
            [Seller, Admin],
            Validation::new().common(required("imageUrl")),
        ),
        EventRule::new(
            SEARCH_VOICE_START,
            [Customer, Seller, Moderator, Admin],
            Validation::new().common(required("sessionId")),
        ),
        EventRule::new(
            NOTIFICATION_MARK_READ,
            Role::ALL,
            Validation::new().common(required("notificationId")),
        ),
        EventRule::new(
            ADMIN_EVICT_CONNECTION,
            [Admin],
            Validation::new()
                .common(required("connectionId"))
                .common(Constraint::NotSelf {
                    field: "connectionId".to_string(),
                    target: SelfTarget::Connection,
                }),
        ),
        EventRule::new(
            ADMIN_BROADCAST,
            [Admin],
            Validation::new().common(required("room")).common(required("event")),
        ),
    ];

    candidates
        .into_iter()
        .filter_map(|candidate| match candidate {
            Ok(rule) => Some(rule),
            Err(err) => {
                tracing::error!(error = %err, "skipping malformed built-in rule");
                None
            }
        })
        .collect()
}

/// A payload each allowed role can send for `event`.
#[cfg(test)]
pub(crate) fn sample_payload(event: &str, role: Role) -> serde_json::Value {
    use serde_json::json;

    match event {
        SELLER_PRODUCT_CREATE => json!({"name": "Clay vase", "price": 120}),
        SELLER_PRODUCT_UPDATE => json!({"productId": "p-1", "price": 99}),
        ORDER_UPDATE_STATUS => {
            let status = match role {
                Role::Customer => "cancelled",
                Role::Seller => "shipped",
                _ => "delivered",
            };
            json!({"orderId": "o-1", "status": status})
        }
        MODERATION_REVIEW_PRODUCT => json!({"productId": "p-1", "decision": "approved"}),
        CRAFT_RECOGNIZE => json!({"imageUrl": "https://cdn.example.com/vase.jpg"}),
        SEARCH_VOICE_START => json!({"sessionId": "s-1"}),
        NOTIFICATION_MARK_READ => json!({"notificationId": "n-1"}),
        ADMIN_EVICT_CONNECTION => json!({"connectionId": uuid::Uuid::new_v4().to_string()}),
        ADMIN_BROADCAST => json!({"room": "role:seller", "event": SYSTEM_ANNOUNCEMENT}),
        _ => json!({}),
    }
}
