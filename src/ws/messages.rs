//! WebSocket frame shapes.
//!
//! Client frames carry a `type` of `auth` or `event`. The server answers
//! inbound events with an `ack` and pushes outbound events as `event`
//! frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EvictionReason, OutboundEvent};
use crate::error::EventError;

/// Client → server frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Token presented after the upgrade.
    Auth {
        /// Bearer token.
        token: String,
    },
    /// Inbound domain event.
    Event {
        /// Event name, e.g. `seller:product_create`.
        event: String,
        /// Event payload.
        #[serde(default)]
        payload: serde_json::Value,
        /// Echoed back in the acknowledgement.
        #[serde(default, rename = "correlationId")]
        correlation_id: Option<String>,
    },
}

/// Acknowledgement of one inbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAck {
    /// Correlation id from the inbound frame, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Inbound event name.
    pub event: String,
    /// Whether the event was accepted and handled.
    pub success: bool,
    /// Handler result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EventError>,
}

impl EventAck {
    /// Builds the ack for a dispatch outcome.
    #[must_use]
    pub fn from_outcome(
        correlation_id: Option<String>,
        event: String,
        outcome: Result<serde_json::Value, EventError>,
    ) -> Self {
        let (success, data, error) = match outcome {
            Ok(data) => (true, Some(data), None),
            Err(error) => (false, None, Some(error)),
        };
        Self {
            correlation_id,
            event,
            success,
            data,
            error,
        }
    }

    /// Ack for a frame that could not be parsed.
    #[must_use]
    pub fn malformed(detail: &str) -> Self {
        Self::from_outcome(
            None,
            String::new(),
            Err(EventError::validation("", format!("Malformed frame: {detail}"))),
        )
    }
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Outbound domain event.
    Event {
        /// Event name.
        event: String,
        /// Event payload.
        payload: serde_json::Value,
        /// Emission time.
        timestamp: DateTime<Utc>,
    },
    /// Acknowledgement of an inbound event.
    Ack(EventAck),
}

impl From<&OutboundEvent> for ServerFrame {
    fn from(event: &OutboundEvent) -> Self {
        Self::Event {
            event: event.event_name.clone(),
            payload: event.payload.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// Close code and reason sent when the server ends a session.
#[must_use]
pub const fn close_frame_for(reason: &EvictionReason) -> (u16, &'static str) {
    match reason {
        EvictionReason::ClientDisconnect => (1000, "CLOSED"),
        EvictionReason::ServerShutdown => (1001, "SERVER_SHUTDOWN"),
        EvictionReason::Timeout => (4000, "LIVENESS_TIMEOUT"),
        EvictionReason::Administrative { .. } => (4002, "EVICTED"),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::Role;

    #[test]
    fn parses_event_frame_with_correlation() {
        let raw = r#"{"type":"event","event":"seller:product_create","payload":{"price":1},"correlationId":"c-1"}"#;
        let Ok(ClientFrame::Event {
            event,
            payload,
            correlation_id,
        }) = serde_json::from_str::<ClientFrame>(raw)
        else {
            panic!("frame should parse");
        };
        assert_eq!(event, "seller:product_create");
        assert_eq!(payload["price"], 1);
        assert_eq!(correlation_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn parses_auth_frame() {
        let frame = serde_json::from_str::<ClientFrame>(r#"{"type":"auth","token":"abc"}"#);
        assert!(matches!(frame, Ok(ClientFrame::Auth { token }) if token == "abc"));
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn failed_ack_serializes_error_and_omits_data() {
        let ack = EventAck::from_outcome(
            Some("c-9".to_string()),
            "admin:broadcast".to_string(),
            Err(EventError::unauthorized("admin:broadcast", vec![Role::Admin])),
        );
        let json = serde_json::to_value(ServerFrame::Ack(ack)).unwrap_or_default();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["correlationId"], "c-9");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn outbound_event_frame_shape() {
        let event = OutboundEvent::new("analytics:update", serde_json::json!({"views": 3}));
        let json = serde_json::to_value(ServerFrame::from(&event)).unwrap_or_default();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "analytics:update");
        assert_eq!(json["payload"]["views"], 3);
    }
}
