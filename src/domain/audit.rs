//! Audit records and the sink they are forwarded to.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;

use super::UserId;

/// Audit record category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Authorization denials and suspicious input.
    Security,
    /// Rule table changes and forced evictions.
    Administration,
    /// Connection lifecycle events.
    Connection,
}

impl AuditCategory {
    /// Stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Administration => "administration",
            Self::Connection => "connection",
        }
    }
}

/// Audit record severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine.
    Low,
    /// Worth reviewing.
    Medium,
    /// Needs follow-up.
    High,
    /// Needs immediate follow-up.
    Critical,
}

impl Severity {
    /// Stored name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Append-only audit entry. Owned by the external sink once forwarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// User whose action triggered the record.
    pub actor_user_id: UserId,
    /// Action name, e.g. `authorization_denied`.
    pub action: String,
    /// Category.
    pub category: AuditCategory,
    /// Severity.
    pub severity: Severity,
    /// Action-specific detail.
    pub metadata: serde_json::Value,
    /// When the action happened.
    pub occurred_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        actor_user_id: UserId,
        action: impl Into<String>,
        category: AuditCategory,
        severity: Severity,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            actor_user_id,
            action: action.into(),
            category,
            severity,
            metadata,
            occurred_at: Utc::now(),
        }
    }
}

/// Failure reported by an [`AuditSink`].
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The sink could not be reached or rejected the write.
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Stores one record.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the record could not be stored; the
    /// forwarder decides whether to retry.
    fn submit<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<(), AuditError>>;
}

/// Sink that writes each record as a structured `tracing` event on the
/// `audit` target, for log pipelines that ship that target elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn submit<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<(), AuditError>> {
        Box::pin(async move {
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|e| AuditError::Unavailable(e.to_string()))?;
            tracing::info!(
                target: "audit",
                actor = %record.actor_user_id,
                action = %record.action,
                category = ?record.category,
                severity = ?record.severity,
                occurred_at = %record.occurred_at.to_rfc3339(),
                metadata = %metadata,
                "audit record"
            );
            Ok(())
        })
    }
}

/// In-memory sink for tests; optionally fails the first `failures` submits.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingAuditSink {
    records: std::sync::Mutex<Vec<AuditRecord>>,
    failures: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl RecordingAuditSink {
    pub(crate) fn failing(failures: u32) -> Self {
        Self {
            records: std::sync::Mutex::default(),
            failures: std::sync::atomic::AtomicU32::new(failures),
        }
    }

    pub(crate) fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl AuditSink for RecordingAuditSink {
    fn submit<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<(), AuditError>> {
        use std::sync::atomic::Ordering;

        Box::pin(async move {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(AuditError::Unavailable("injected failure".to_string()));
            }
            if let Ok(mut records) = self.records.lock() {
                records.push(record.clone());
            }
            Ok(())
        })
    }
}
