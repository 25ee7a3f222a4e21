//! Error types for the HTTP surface, admission, and inbound event handling.
//!
//! [`RealtimeError`] is the central error type for HTTP handlers. Each
//! variant maps to a specific HTTP status code and structured JSON error
//! response. Inbound WebSocket events never surface a `RealtimeError`;
//! they answer with an [`EventError`] carrying one of the
//! [`EventErrorCode`]s.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{ConnectionId, Role, RuleError};

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2002,
///     "message": "validation failed: Price exceeds maximum allowed for seller: 10000",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Identity        | 401 Unauthorized / 403       |
/// | 2000–2999 | Request         | 400 Bad Request / 404        |
/// | 3000–3999 | Connections     | 404 Not Found                |
/// | 4000–4999 | Collaborators   | 503 Service Unavailable      |
/// | 5000–5999 | Server          | 500 Internal Server Error    |
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// Missing or invalid bearer token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Caller's role is not permitted.
    #[error("forbidden: requires one of {}", format_roles(.required_roles))]
    Forbidden {
        /// Roles that would be permitted.
        required_roles: Vec<Role>,
    },

    /// Malformed request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request parsed but broke a business constraint.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Rule table operation failed.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// No live connection with the given id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// A domain collaborator could not be queried.
    #[error("update source {source_name} unavailable: {detail}")]
    SourceUnavailable {
        /// Collaborator name.
        source_name: &'static str,
        /// Failure detail.
        detail: String,
    },

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

fn format_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(Role::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl RealtimeError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Unauthenticated(_) => 1001,
            Self::Forbidden { .. } => 1002,
            Self::InvalidRequest(_) => 2001,
            Self::Validation(_) => 2002,
            Self::Rule(RuleError::NotFound(_)) => 2004,
            Self::Rule(_) => 2003,
            Self::ConnectionNotFound(_) => 3001,
            Self::SourceUnavailable { .. } => 4001,
            Self::Persistence(_) => 5001,
            Self::Internal(_) => 5000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Rule(RuleError::NotFound(_)) | Self::ConnectionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidRequest(_) | Self::Validation(_) | Self::Rule(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::SourceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RealtimeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Never leak collaborator internals to clients.
            Self::SourceUnavailable { source_name, .. } => {
                format!("update source {source_name} unavailable, retry later")
            }
            Self::Persistence(_) | Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message,
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Reasons a connection attempt is refused. Always fatal to the attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// No token was presented.
    #[error("missing bearer token")]
    MissingToken,
    /// Signature, issuer, or structure check failed.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// Token is past its expiry.
    #[error("token expired")]
    Expired,
    /// Token carries a role this server does not know.
    #[error("unknown role in token: {0}")]
    UnknownRole(String),
    /// No valid token arrived before the handshake deadline.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// Verification could not run.
    #[error("token verification unavailable")]
    VerifierUnavailable,
}

impl AdmissionError {
    /// Wire code sent with the rejection.
    pub const CODE: &'static str = "AUTH_FAILED";

    /// WebSocket close code used for post-upgrade rejections.
    pub const CLOSE_CODE: u16 = 4001;
}

impl From<AdmissionError> for RealtimeError {
    fn from(err: AdmissionError) -> Self {
        Self::Unauthenticated(err.to_string())
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": Self::CODE,
                "message": self.to_string(),
            }
        });
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}

/// Error codes surfaced to clients for inbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventErrorCode {
    /// Role not permitted, or no rule for the event.
    Unauthorized,
    /// Payload failed rule checks.
    ValidationError,
    /// Handler failed.
    InternalError,
}

/// Error half of an inbound event acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventError {
    /// Error class.
    pub code: EventErrorCode,
    /// Client-facing message.
    pub message: String,
    /// Inbound event name that failed.
    pub event: String,
    /// Roles that would be permitted, for `UNAUTHORIZED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_roles: Option<Vec<Role>>,
}

impl EventError {
    /// Role not permitted.
    #[must_use]
    pub fn unauthorized(event: &str, required_roles: Vec<Role>) -> Self {
        let message = if required_roles.is_empty() {
            format!("Event {event} is not permitted")
        } else {
            format!(
                "Event {event} requires one of: {}",
                format_roles(&required_roles)
            )
        };
        Self {
            code: EventErrorCode::Unauthorized,
            message,
            event: event.to_string(),
            required_roles: Some(required_roles),
        }
    }

    /// Payload failed validation.
    #[must_use]
    pub fn validation(event: &str, message: impl Into<String>) -> Self {
        Self {
            code: EventErrorCode::ValidationError,
            message: message.into(),
            event: event.to_string(),
            required_roles: None,
        }
    }

    /// Handler failure, with internals withheld.
    #[must_use]
    pub fn internal(event: &str) -> Self {
        Self {
            code: EventErrorCode::InternalError,
            message: "Internal server error".to_string(),
            event: event.to_string(),
            required_roles: None,
        }
    }
}

/// Failure reported by a domain event handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The request was well-formed but cannot be honored; the message is
    /// shown to the client.
    #[error("{0}")]
    Rejected(String),
    /// The handler could not complete; the detail stays server-side.
    #[error("handler failed: {0}")]
    Failed(String),
    /// The handler task panicked or was cancelled.
    #[error("handler task aborted")]
    Aborted,
}

impl From<RealtimeError> for HandlerError {
    fn from(err: RealtimeError) -> Self {
        match err {
            RealtimeError::Validation(message) | RealtimeError::InvalidRequest(message) => {
                Self::Rejected(message)
            }
            RealtimeError::ConnectionNotFound(id) => {
                Self::Rejected(format!("Connection {id} not found"))
            }
            other => Self::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_not_found_maps_to_404() {
        let err = RealtimeError::from(RuleError::NotFound("x".to_string()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), 2004);
    }

    #[test]
    fn forbidden_lists_roles() {
        let err = RealtimeError::Forbidden {
            required_roles: vec![Role::Admin],
        };
        assert_eq!(err.to_string(), "forbidden: requires one of admin");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn event_error_codes_serialize_screaming() {
        let err = EventError::validation("seller:product_create", "bad");
        let json = serde_json::to_value(&err).unwrap_or_default();
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert!(json.get("requiredRoles").is_none());

        let denied = EventError::unauthorized("admin:broadcast", vec![Role::Admin]);
        let json = serde_json::to_value(&denied).unwrap_or_default();
        assert_eq!(json["code"], "UNAUTHORIZED");
        assert_eq!(json["requiredRoles"], serde_json::json!(["admin"]));
    }

    #[test]
    fn internal_error_hides_detail() {
        let err = EventError::internal("craft:recognize");
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn client_errors_stay_visible_to_handlers() {
        let err = HandlerError::from(RealtimeError::Validation(
            "Cannot target your own connection".to_string(),
        ));
        assert_eq!(
            err,
            HandlerError::Rejected("Cannot target your own connection".to_string())
        );
        let err = HandlerError::from(RealtimeError::Persistence("db down".to_string()));
        assert!(matches!(err, HandlerError::Failed(_)));
    }

    #[test]
    fn admission_errors_become_unauthenticated() {
        let err = RealtimeError::from(AdmissionError::Expired);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }
}
