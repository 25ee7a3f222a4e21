//! Administrative request and response bodies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{Constraint, ConnectionSummary, DeliveryReport, EventRule, Role};

/// An installed event rule.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleDto {
    /// Governed inbound event.
    pub event_name: String,
    /// Roles permitted to emit it.
    pub allowed_roles: Vec<Role>,
    /// Constraints for every role.
    pub common: Vec<Constraint>,
    /// Constraints keyed by role name.
    pub per_role: BTreeMap<String, Vec<Constraint>>,
}

impl From<&EventRule> for RuleDto {
    fn from(rule: &EventRule) -> Self {
        let validation = rule.validation();
        Self {
            event_name: rule.event_name().to_string(),
            allowed_roles: rule.allowed_roles().iter().copied().collect(),
            common: validation.common.clone(),
            per_role: validation
                .per_role
                .iter()
                .map(|(role, constraints)| (role.to_string(), constraints.clone()))
                .collect(),
        }
    }
}

/// Result of installing a rule.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleInstalledResponse {
    /// Governed inbound event.
    pub event_name: String,
    /// `true` when an existing rule was replaced.
    pub replaced: bool,
}

/// A live connection.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDto {
    /// Connection identifier.
    #[schema(value_type = String, format = Uuid)]
    pub connection_id: String,
    /// Owning user.
    pub user_id: String,
    /// Connection role.
    pub role: Role,
    /// Account email.
    pub email: String,
    /// Admission time.
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity.
    pub last_seen_at: DateTime<Utc>,
    /// Room names.
    pub rooms: Vec<String>,
}

impl From<ConnectionSummary> for ConnectionDto {
    fn from(summary: ConnectionSummary) -> Self {
        Self {
            connection_id: summary.connection_id.to_string(),
            user_id: summary.user_id.to_string(),
            role: summary.role,
            email: summary.email,
            connected_at: summary.connected_at,
            last_seen_at: summary.last_seen_at,
            rooms: summary.rooms.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Body of `POST /api/v1/admin/broadcast`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    /// `user:<id>` or `role:<role>`; omit or `null` for every connection.
    #[serde(default)]
    pub room: Option<String>,
    /// Outbound event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

/// Fan-out result.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryDto {
    /// Connections whose queue accepted the event.
    pub delivered: usize,
    /// Connections skipped because their queue was full.
    pub dropped: usize,
}

impl From<DeliveryReport> for DeliveryDto {
    fn from(report: DeliveryReport) -> Self {
        Self {
            delivered: report.delivered,
            dropped: report.dropped,
        }
    }
}
